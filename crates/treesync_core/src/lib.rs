//! # treesync core
//!
//! Keeps local models and collections in step with a realtime
//! hierarchical key-value store.
//!
//! This crate provides:
//! - A local model substrate: [`Model`], [`Collection`] and their events
//! - Location resolution ([`resolve`], [`ReferenceResolver`])
//! - Snapshot normalization ([`normalize`], [`normalize_snapshot`])
//! - A single dispatch funnel for reads and writes ([`sync`], [`dispatch`])
//! - Per-record sync ([`SyncedModel`])
//! - Per-collection sync ([`SyncedCollection`]) with a one-shot
//!   ([`SnapshotStrategy`]) and a continuous ([`LiveStrategy`]) strategy
//!
//! ## Sync model
//!
//! Local edits flow out through the dispatcher; remote notifications flow in
//! through listeners and are applied without being written back. A record
//! applying a remote change is in [`SyncGuard::RemoteApplying`], and its
//! change events are ignored by the sync layer. Silent collection writes
//! arm an [`EchoGuard`] token that absorbs the matching notification.
//!
//! Remote failures never panic and are never returned from the call that
//! started the operation: they reach the caller through [`SyncOptions`]
//! callbacks or as `core:error` events.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use treesync_core::{SyncContext, SyncedCollection, SyncOptions, FetchOptions};
//! use treesync_store::{Database, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let context = SyncContext::new().with_database(Database::new(store.clone()));
//!
//! let todos = SyncedCollection::builder(&context).location("todos").build().unwrap();
//! todos.fetch(FetchOptions::new()).unwrap();
//!
//! let created = todos
//!     .create(json!({"title": "ship it"}).as_object().cloned().unwrap(), SyncOptions::new())
//!     .unwrap();
//! let id = created["id"].as_str().unwrap();
//! assert_eq!(store.value(&format!("todos/{id}")), json!({"title": "ship it"}));
//! assert_eq!(todos.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attributes;
mod config;
mod error;
pub mod local;
pub mod sync;

pub use attributes::{compare_attributes, identifier_string, is_primitive, Attributes, PRIORITY_KEY};
pub use config::{
    ModelDefaults, ResolvedConfig, SyncConfig, SyncContext, SyncSettings, DEFAULT_ID_ATTRIBUTE,
};
pub use error::{SyncError, SyncResult};
pub use local::{
    Collection, CollectionEvent, EventEmitter, HandlerId, Model, ModelEvent, ModelEventKind,
    RemoteApplyGuard, SyncGuard,
};
pub use sync::{
    completion_for, dispatch, normalize, normalize_snapshot, read_callback, resolve, sync,
    CollectionSyncStrategy, EchoGuard, EchoKind, EchoToken, FetchOptions, LiveStrategy, Location,
    Method, ModelLocation, Notify, ReferenceResolver, SnapshotStrategy, SyncMode, SyncOptions,
    Syncable, SyncedCollection, SyncedCollectionBuilder, SyncedModel, SyncedModelBuilder,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
