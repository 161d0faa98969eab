//! Test fixtures and event recorders.
//!
//! Provides a memory-backed sync environment and spies that record the
//! events collections and models emit.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Once};
use treesync_core::{
    Attributes, Collection, CollectionEvent, HandlerId, Model, ModelEventKind, SyncConfig,
    SyncContext, SyncError, SyncedCollection, SyncedModel,
};
use treesync_store::{Database, MemoryStore};

/// A memory store wired into a sync context.
pub struct TestStore {
    /// The store.
    pub store: Arc<MemoryStore>,
    /// A database over the store.
    pub database: Database,
    /// A context using the database, with `auto_sync` on.
    pub context: SyncContext,
}

impl TestStore {
    /// Creates an environment whose store delivers events immediately.
    pub fn memory() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// Creates an environment whose store queues events until
    /// [`MemoryStore::flush`].
    pub fn deferred() -> Self {
        Self::with_store(MemoryStore::deferred())
    }

    fn with_store(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let database = Database::new(store.clone());
        let context = SyncContext::new().with_database(database.clone());
        Self {
            store,
            database,
            context,
        }
    }

    /// Writes `value` at `path` as another client would.
    pub fn seed(&self, path: &str, value: Value) {
        self.store
            .remote_set(path, value)
            .expect("Failed to seed store");
    }

    /// Builds a live collection at `location`.
    pub fn live_collection(&self, location: &str) -> SyncedCollection {
        SyncedCollection::builder(&self.context)
            .location(location)
            .config(SyncConfig::new().with_auto_sync(true))
            .build()
            .expect("Failed to build live collection")
    }

    /// Builds a one-shot collection at `location`.
    pub fn snapshot_collection(&self, location: &str) -> SyncedCollection {
        SyncedCollection::builder(&self.context)
            .location(location)
            .config(SyncConfig::new().with_auto_sync(false))
            .build()
            .expect("Failed to build snapshot collection")
    }

    /// Builds an auto-synced model at a fixed `location`.
    pub fn model_at(&self, location: &str) -> SyncedModel {
        SyncedModel::builder(&self.context)
            .location(location)
            .build()
            .expect("Failed to build model")
    }

    /// Builds an auto-synced model stored under `root`.
    pub fn model_under(&self, root: &str, attributes: Attributes) -> SyncedModel {
        SyncedModel::builder(&self.context)
            .url_root(root)
            .attributes(attributes)
            .build()
            .expect("Failed to build model")
    }
}

impl std::ops::Deref for TestStore {
    type Target = MemoryStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Converts a JSON object literal into attributes.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Records the events a collection emits.
pub struct CollectionRecorder {
    collection: Collection,
    handler: HandlerId,
    names: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<(String, SyncError)>>>,
}

impl CollectionRecorder {
    /// Starts recording `collection`.
    pub fn attach(collection: &Collection) -> Self {
        let names = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (name_sink, error_sink) = (Arc::clone(&names), Arc::clone(&errors));
        let handler = collection.on(move |event| {
            name_sink.lock().push(event.name().to_string());
            if let CollectionEvent::Error { operation, error } = event {
                error_sink.lock().push((operation.clone(), error.clone()));
            }
        });
        Self {
            collection: collection.clone(),
            handler,
            names,
            errors,
        }
    }

    /// Event names in emission order.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }

    /// How many events named `name` were seen.
    pub fn count(&self, name: &str) -> usize {
        self.names.lock().iter().filter(|n| *n == name).count()
    }

    /// `core:error` payloads as `(operation, error)`.
    pub fn errors(&self) -> Vec<(String, SyncError)> {
        self.errors.lock().clone()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.names.lock().clear();
        self.errors.lock().clear();
    }
}

impl Drop for CollectionRecorder {
    fn drop(&mut self) {
        self.collection.off(self.handler);
    }
}

/// Records the events a model emits.
pub struct ModelRecorder {
    model: Model,
    handler: HandlerId,
    names: Arc<Mutex<Vec<String>>>,
    changes: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ModelRecorder {
    /// Starts recording `model`.
    pub fn attach(model: &Model) -> Self {
        let names = Arc::new(Mutex::new(Vec::new()));
        let changes = Arc::new(Mutex::new(Vec::new()));
        let (name_sink, change_sink) = (Arc::clone(&names), Arc::clone(&changes));
        let handler = model.on(move |event| {
            name_sink.lock().push(event.name().to_string());
            if let ModelEventKind::Change { changed } = &event.kind {
                change_sink.lock().push(changed.clone());
            }
        });
        Self {
            model: model.clone(),
            handler,
            names,
            changes,
        }
    }

    /// Event names in emission order.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }

    /// The changed keys of every `change` event.
    pub fn changes(&self) -> Vec<Vec<String>> {
        self.changes.lock().clone()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.names.lock().clear();
        self.changes.lock().clear();
    }
}

impl Drop for ModelRecorder {
    fn drop(&mut self) {
        self.model.off(self.handler);
    }
}

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG`; output goes through the test harness
/// so it is only shown for failing tests.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
