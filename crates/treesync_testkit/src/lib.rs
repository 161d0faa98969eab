//! # treesync testkit
//!
//! Test utilities for treesync.
//!
//! This crate provides:
//! - Fixtures wiring a [`MemoryStore`](treesync_store::MemoryStore) into a
//!   sync context
//! - Event recorders for collections and models
//! - Property-based test generators using proptest
//! - Tracing initialisation for tests
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::json;
//! use treesync_testkit::prelude::*;
//!
//! let env = TestStore::memory();
//! env.seed("todos/a", json!({"title": "x"}));
//!
//! let todos = env.live_collection("todos");
//! let events = CollectionRecorder::attach(todos.collection());
//! todos.fetch(Default::default()).unwrap();
//! assert_eq!(events.names(), vec!["add", "sync"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
