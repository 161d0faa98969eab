//! Remote store trait definition.

use crate::error::StoreResult;
use crate::path::Path;
use crate::snapshot::{EventType, Snapshot};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Identifier of a registered listener, used to detach it.
pub type ListenerId = u64;

/// Completion callback for writes.
pub type Completion = Box<dyn FnOnce(StoreResult<()>) + Send>;

/// Callback for one-shot reads.
pub type ReadCallback = Box<dyn FnOnce(StoreResult<Snapshot>) + Send>;

/// Realtime listener. Receives `Err` once if the subscription is cancelled
/// by the store, after which it receives nothing further.
pub type Listener = Arc<dyn Fn(StoreResult<Snapshot>) + Send + Sync>;

/// Wraps a closure as an optional write completion.
pub fn completion<F>(f: F) -> Option<Completion>
where
    F: FnOnce(StoreResult<()>) + Send + 'static,
{
    Some(Box::new(f))
}

/// A client for a hierarchical key-value store with realtime notifications.
///
/// This is the seam between treesync and a concrete store client. All
/// operations are non-blocking: results arrive through callbacks, which a
/// store may invoke before the call returns (as local writes do in most
/// realtime clients) or later.
///
/// # Invariants
///
/// - Writing `Value::Null` (or an empty object) deletes the node
/// - Events for one path are delivered in listener-registration order
/// - Local write events are delivered before the write's completion
/// - A `Value` listener fires once with the current value on registration,
///   a `ChildAdded` listener fires once per existing child
/// - Implementations must not hold internal locks while invoking callbacks
pub trait RemoteStore: Send + Sync {
    /// The authority (host) this store is served from.
    fn host(&self) -> &str;

    /// Reads the current value at `path` once.
    fn read(&self, path: &Path, callback: ReadCallback);

    /// Overwrites the node at `path`, replacing its priority.
    fn set(
        &self,
        path: &Path,
        value: Value,
        priority: Option<Value>,
        on_complete: Option<Completion>,
    );

    /// Merges `values` into the node at `path`.
    ///
    /// Keys are child paths relative to `path`; a `Value::Null` entry
    /// deletes that child. A `.priority` entry sets the node's priority.
    fn update(&self, path: &Path, values: Map<String, Value>, on_complete: Option<Completion>);

    /// Generates a unique, chronologically ordered child key.
    fn generate_push_id(&self) -> String;

    /// Registers a realtime listener.
    fn listen(&self, path: &Path, event: EventType, listener: Listener) -> ListenerId;

    /// Detaches a listener. Returns false if it was not registered.
    fn unlisten(&self, id: ListenerId) -> bool;
}
