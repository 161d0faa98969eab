//! Handles to nodes of a remote store.

use crate::backend::{Completion, Listener, ListenerId, RemoteStore};
use crate::error::{StoreError, StoreResult};
use crate::path::Path;
use crate::snapshot::{EventType, Snapshot};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// A handle bound to one path of a remote store.
///
/// Handles are cheap to clone. Each handle created through [`Reference::new`],
/// [`Reference::child`] or [`Database::reference`] gets a fresh handle id, so
/// callers can tell a cached handle from a rebuilt one; clones share the id.
#[derive(Clone)]
pub struct Reference {
    store: Arc<dyn RemoteStore>,
    path: Path,
    handle: u64,
}

impl Reference {
    /// Creates a handle to `path` in `store`.
    pub fn new(store: Arc<dyn RemoteStore>, path: Path) -> Self {
        Self {
            store,
            path,
            handle: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The node's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The node's key, `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.path.key()
    }

    /// Identity of this handle.
    pub fn handle_id(&self) -> u64 {
        self.handle
    }

    /// The store this handle points into.
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Returns true if both handles point at the same node of the same store.
    pub fn same_node(&self, other: &Reference) -> bool {
        self.path == other.path
            && std::ptr::eq(
                Arc::as_ptr(&self.store) as *const (),
                Arc::as_ptr(&other.store) as *const (),
            )
    }

    /// The node's absolute URL.
    pub fn url(&self) -> String {
        if self.path.is_root() {
            format!("https://{}/", self.store.host())
        } else {
            format!("https://{}{}", self.store.host(), self.path)
        }
    }

    /// Returns a handle to a descendant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if `relative` is empty or invalid.
    pub fn child(&self, relative: &str) -> StoreResult<Reference> {
        Ok(Reference::new(Arc::clone(&self.store), self.path.child(relative)?))
    }

    /// Returns a handle to the parent node, `None` at the root.
    pub fn parent(&self) -> Option<Reference> {
        self.path
            .parent()
            .map(|path| Reference::new(Arc::clone(&self.store), path))
    }

    /// Returns a handle to a new child with a generated push-id.
    ///
    /// Nothing is written.
    pub fn push(&self) -> Reference {
        let key = self.store.generate_push_id();
        Reference::new(Arc::clone(&self.store), self.path.push_unchecked(key))
    }

    /// Reads the node's value once.
    pub fn once<F>(&self, callback: F)
    where
        F: FnOnce(StoreResult<Snapshot>) + Send + 'static,
    {
        self.store.read(&self.path, Box::new(callback));
    }

    /// Subscribes to `event` on this node.
    ///
    /// The listener stays attached until the returned [`Subscription`] is
    /// cancelled or dropped.
    pub fn on<F>(&self, event: EventType, listener: F) -> Subscription
    where
        F: Fn(StoreResult<Snapshot>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.store.listen(&self.path, event, listener);
        trace!(path = %self.path, event = %event, id, "listener attached");
        Subscription {
            reference: self.clone(),
            event,
            id,
            attached: AtomicBool::new(true),
        }
    }

    /// Overwrites the node.
    pub fn set(&self, value: Value, on_complete: Option<Completion>) {
        self.store.set(&self.path, value, None, on_complete);
    }

    /// Overwrites the node and sets its priority.
    pub fn set_with_priority(&self, value: Value, priority: Value, on_complete: Option<Completion>) {
        self.store.set(&self.path, value, Some(priority), on_complete);
    }

    /// Merges `values` into the node.
    pub fn update(&self, values: Map<String, Value>, on_complete: Option<Completion>) {
        self.store.update(&self.path, values, on_complete);
    }

    /// Deletes the node.
    pub fn remove(&self, on_complete: Option<Completion>) {
        self.set(Value::Null, on_complete);
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .finish()
    }
}

/// A registered realtime listener.
///
/// Dropping a subscription detaches it.
#[derive(Debug)]
pub struct Subscription {
    reference: Reference,
    event: EventType,
    id: ListenerId,
    attached: AtomicBool,
}

impl Subscription {
    /// The reference the listener is attached to.
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// The subscribed event kind.
    pub fn event(&self) -> EventType {
        self.event
    }

    /// The store-assigned listener id.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Detaches the listener. Safe to call on an already-cancelled listener.
    pub fn cancel(&self) {
        if !self.attached.swap(false, Ordering::SeqCst) {
            return;
        }
        let removed = self.reference.store.unlisten(self.id);
        trace!(
            path = %self.reference.path,
            event = %self.event,
            id = self.id,
            removed,
            "listener detached"
        );
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The root handle of a remote store plus the host pattern used to
/// recognise absolute URLs that point into it.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn RemoteStore>,
    host_suffix: String,
}

impl Database {
    /// Default host suffix recognised as a store URL.
    pub const DEFAULT_HOST_SUFFIX: &'static str = ".treesync.io";

    /// Creates a database over `store`.
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            host_suffix: Self::DEFAULT_HOST_SUFFIX.to_string(),
        }
    }

    /// Sets the host suffix recognised as a store URL.
    #[must_use]
    pub fn with_host_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.host_suffix = suffix.into();
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// The host suffix recognised as a store URL.
    pub fn host_suffix(&self) -> &str {
        &self.host_suffix
    }

    /// A handle to the root node.
    pub fn root(&self) -> Reference {
        Reference::new(Arc::clone(&self.store), Path::root())
    }

    /// A handle to the node at a slash-separated path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path is malformed.
    pub fn reference(&self, path: &str) -> StoreResult<Reference> {
        Ok(Reference::new(Arc::clone(&self.store), Path::parse(path)?))
    }

    /// Returns true if `candidate` is an `https` URL whose authority matches
    /// the host pattern.
    pub fn is_store_url(&self, candidate: &str) -> bool {
        split_https(candidate)
            .map(|(authority, _)| {
                authority
                    .to_ascii_lowercase()
                    .ends_with(&self.host_suffix.to_ascii_lowercase())
            })
            .unwrap_or(false)
    }

    /// A handle to the node named by an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUrl`] if the URL is not `https` or its
    /// authority is not this store's host, and [`StoreError::InvalidPath`]
    /// if its path is malformed.
    pub fn reference_from_url(&self, url: &str) -> StoreResult<Reference> {
        let (authority, path) =
            split_https(url).ok_or_else(|| StoreError::invalid_url(url, "expected https URL"))?;
        if !authority.eq_ignore_ascii_case(self.store.host()) {
            return Err(StoreError::invalid_url(
                url,
                format!("host does not match {}", self.store.host()),
            ));
        }
        let path = path.split(['?', '#']).next().unwrap_or_default();
        self.reference(path)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("host", &self.store.host())
            .field("host_suffix", &self.host_suffix)
            .finish()
    }
}

/// Splits `https://authority/path` into authority and path.
fn split_https(url: &str) -> Option<(&str, &str)> {
    let scheme_len = "https://".len();
    if url.len() < scheme_len || !url[..scheme_len].eq_ignore_ascii_case("https://") {
        return None;
    }
    let rest = &url[scheme_len..];
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        None
    } else {
        Some((authority, path))
    }
}
