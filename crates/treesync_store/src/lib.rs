//! # treesync store
//!
//! The remote side of treesync: a hierarchical key-value store with
//! realtime notifications.
//!
//! This crate defines the [`RemoteStore`] seam that a concrete store client
//! implements, the handle types the sync layer works with, and an
//! in-process [`MemoryStore`] used by tests and demos.
//!
//! ## Design Principles
//!
//! - Every store operation is callback-based and non-blocking
//! - Handles ([`Reference`]) are cheap, cloneable and carry an identity
//! - Writing null deletes; empty objects collapse to null
//! - Stores never hold their own locks while calling back
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use treesync_store::{Database, EventType, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let db = Database::new(store.clone());
//! let todos = db.reference("todos").unwrap();
//!
//! let sub = todos.on(EventType::ChildAdded, |snap| {
//!     println!("added {:?}", snap.map(|s| s.key().map(str::to_string)));
//! });
//! todos.push().set(json!({"title": "write docs"}), None);
//! sub.cancel();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod path;
mod push_id;
mod reference;
mod snapshot;

pub use backend::{completion, Completion, Listener, ListenerId, ReadCallback, RemoteStore};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, WriteKind, WriteRecord};
pub use path::{Path, FORBIDDEN_CHARS};
pub use push_id::{PushIdGenerator, PUSH_ID_LEN};
pub use reference::{Database, Reference, Subscription};
pub use snapshot::{EventType, Snapshot};
