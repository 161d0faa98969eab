//! Synchronized collections.

use super::dispatch::{Method, SyncOptions, Syncable};
use super::live::LiveStrategy;
use super::resolver::{Location, ReferenceResolver};
use super::snapshot::SnapshotStrategy;
use super::strategy::{
    CollectionCore, CollectionSyncStrategy, CollectionTarget, FetchOptions, Notify, SyncMode,
};
use crate::attributes::Attributes;
use crate::config::{ModelDefaults, SyncConfig, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::local::{Collection, CollectionEvent, HandlerId, Model};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use treesync_store::Reference;

/// A collection bound to the children of one remote node.
///
/// The strategy is picked once from the resolved `auto_sync` setting:
/// [`LiveStrategy`] when on, [`SnapshotStrategy`] when off.
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use treesync_core::{FetchOptions, SyncContext, SyncedCollection, SyncMode};
/// use treesync_store::{Database, MemoryStore};
///
/// let store = Arc::new(MemoryStore::new());
/// store.remote_set("todos/t1", json!({"title": "write docs"})).unwrap();
///
/// let context = SyncContext::new().with_database(Database::new(store.clone()));
/// let todos = SyncedCollection::builder(&context).location("todos").build().unwrap();
/// assert_eq!(todos.mode(), SyncMode::Live);
///
/// todos.fetch(FetchOptions::new()).unwrap();
/// assert_eq!(todos.get("t1").unwrap().get("title"), Some(json!("write docs")));
/// ```
#[derive(Clone)]
pub struct SyncedCollection {
    core: Arc<CollectionCore>,
    strategy: Arc<dyn CollectionSyncStrategy>,
}

/// Builder for [`SyncedCollection`].
#[derive(Debug)]
pub struct SyncedCollectionBuilder {
    context: SyncContext,
    config: SyncConfig,
    defaults: ModelDefaults,
    location: Option<Location>,
}

impl SyncedCollectionBuilder {
    /// Sets the parent node.
    pub fn location(mut self, location: impl Into<Location>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets per-collection options.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the type defaults.
    pub fn defaults(mut self, defaults: ModelDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Builds the collection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingDatabase`] if no database is configured
    /// and [`SyncError::InvalidLocation`] if the location is missing or
    /// malformed.
    pub fn build(self) -> SyncResult<SyncedCollection> {
        let resolved = self.config.resolve(&self.defaults, &self.context)?;
        let location = self
            .location
            .ok_or_else(|| SyncError::invalid_location("", "no location given"))?;
        let resolver = ReferenceResolver::new(resolved.database);
        resolver.resolve(&location)?;

        let collection = Collection::with_id_attribute(resolved.id_attribute);
        let core = Arc::new(CollectionCore::new(collection, location, resolver));
        let strategy: Arc<dyn CollectionSyncStrategy> = if resolved.auto_sync {
            LiveStrategy::new(Arc::clone(&core))
        } else {
            SnapshotStrategy::new(Arc::clone(&core))
        };
        debug!(mode = ?strategy.mode(), "collection built");
        Ok(SyncedCollection { core, strategy })
    }
}

impl SyncedCollection {
    /// Starts building a collection in `context`.
    pub fn builder(context: &SyncContext) -> SyncedCollectionBuilder {
        SyncedCollectionBuilder {
            context: context.clone(),
            config: SyncConfig::new(),
            defaults: ModelDefaults::new(),
            location: None,
        }
    }

    /// The active strategy's mode.
    pub fn mode(&self) -> SyncMode {
        self.strategy.mode()
    }

    /// The local collection.
    pub fn collection(&self) -> &Collection {
        &self.core.collection
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.core.collection.len()
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.core.collection.is_empty()
    }

    /// The member with identifier `id`.
    pub fn get(&self, id: &str) -> Option<Model> {
        self.core.collection.get(id)
    }

    /// Members in order.
    pub fn models(&self) -> Vec<Model> {
        self.core.collection.models()
    }

    /// Member identifiers in order.
    pub fn ids(&self) -> Vec<String> {
        self.core.collection.ids()
    }

    /// The collection's reference.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidLocation`] if the location does not resolve.
    pub fn reference(&self, refresh: bool) -> SyncResult<Reference> {
        self.strategy.reference(refresh)
    }

    /// Loads the remote membership.
    ///
    /// # Errors
    ///
    /// Returns resolution errors; remote failures go through the callbacks.
    pub fn fetch(&self, options: FetchOptions) -> SyncResult<()> {
        self.strategy.fetch(options)
    }

    /// Adds records with events.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidIdentifier`] for an identifier that cannot
    /// name a child node.
    pub fn add(&self, records: Vec<Attributes>, options: SyncOptions) -> SyncResult<Vec<Attributes>> {
        self.strategy.add(records, Notify::Emit, options)
    }

    /// Adds records without events.
    ///
    /// # Errors
    ///
    /// As [`add`](SyncedCollection::add).
    pub fn add_silent(
        &self,
        records: Vec<Attributes>,
        options: SyncOptions,
    ) -> SyncResult<Vec<Attributes>> {
        self.strategy.add(records, Notify::Silent, options)
    }

    /// Adds one record and persists it.
    ///
    /// # Errors
    ///
    /// As [`add`](SyncedCollection::add).
    pub fn create(&self, record: Attributes, options: SyncOptions) -> SyncResult<Attributes> {
        self.strategy.create(record, options)
    }

    /// Removes members with events.
    ///
    /// # Errors
    ///
    /// Returns resolution errors.
    pub fn remove(&self, ids: &[String], options: SyncOptions) -> SyncResult<()> {
        self.strategy.remove(ids, Notify::Emit, options)
    }

    /// Removes members without events.
    ///
    /// # Errors
    ///
    /// Returns resolution errors.
    pub fn remove_silent(&self, ids: &[String], options: SyncOptions) -> SyncResult<()> {
        self.strategy.remove(ids, Notify::Silent, options)
    }

    /// Replaces the membership and emits one `reset`.
    ///
    /// # Errors
    ///
    /// As [`add`](SyncedCollection::add).
    pub fn reset(&self, records: Vec<Attributes>) -> SyncResult<Vec<Attributes>> {
        self.strategy.reset(records, Notify::Emit)
    }

    /// Replaces the membership without events.
    ///
    /// # Errors
    ///
    /// As [`add`](SyncedCollection::add).
    pub fn reset_silent(&self, records: Vec<Attributes>) -> SyncResult<Vec<Attributes>> {
        self.strategy.reset(records, Notify::Silent)
    }

    /// Writes one member as it stands locally.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingIdentifier`] if the member has no identifier.
    pub fn save(&self, model: &Model, options: SyncOptions) -> SyncResult<()> {
        self.strategy.save(model, options)
    }

    /// Runs `method` for `entity` through the strategy's funnel.
    ///
    /// # Errors
    ///
    /// Returns the entity's resolution error.
    pub fn sync(&self, method: Method, entity: &dyn Syncable, options: SyncOptions) -> SyncResult<()> {
        self.strategy.sync(method, entity, options)
    }

    /// Registers a handler for collection events.
    pub fn on(&self, handler: impl Fn(&CollectionEvent) + Send + Sync + 'static) -> HandlerId {
        self.core.collection.on(handler)
    }

    /// Removes a handler.
    pub fn off(&self, id: HandlerId) -> bool {
        self.core.collection.off(id)
    }

    /// Detaches every listener the collection's strategy owns.
    pub fn close(&self) {
        self.strategy.close();
    }
}

impl Syncable for SyncedCollection {
    fn sync_reference(&self) -> SyncResult<Reference> {
        self.strategy.reference(false)
    }

    fn sync_payload(&self) -> Value {
        CollectionTarget { core: &self.core }.sync_payload()
    }
}

impl fmt::Debug for SyncedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedCollection")
            .field("mode", &self.mode())
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use treesync_store::{Database, MemoryStore};

    fn context(store: &Arc<MemoryStore>) -> SyncContext {
        SyncContext::new().with_database(Database::new(store.clone()))
    }

    #[test]
    fn mode_follows_resolved_auto_sync() {
        let store = Arc::new(MemoryStore::new());
        let live = SyncedCollection::builder(&context(&store))
            .location("a")
            .build()
            .unwrap();
        assert_eq!(live.mode(), SyncMode::Live);

        let snapshot = SyncedCollection::builder(&context(&store).with_auto_sync(true))
            .location("a")
            .defaults(ModelDefaults::new().with_auto_sync(false))
            .build()
            .unwrap();
        assert_eq!(snapshot.mode(), SyncMode::Snapshot);

        let explicit = SyncedCollection::builder(&context(&store))
            .location("a")
            .defaults(ModelDefaults::new().with_auto_sync(false))
            .config(SyncConfig::new().with_auto_sync(true))
            .build()
            .unwrap();
        assert_eq!(explicit.mode(), SyncMode::Live);
    }

    #[test]
    fn build_validates_configuration() {
        let store = Arc::new(MemoryStore::new());
        assert_eq!(
            SyncedCollection::builder(&SyncContext::new())
                .location("a")
                .build()
                .unwrap_err(),
            SyncError::MissingDatabase
        );
        assert!(matches!(
            SyncedCollection::builder(&context(&store)).build(),
            Err(SyncError::InvalidLocation { .. })
        ));
        assert!(matches!(
            SyncedCollection::builder(&context(&store)).location("a[0]").build(),
            Err(SyncError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn members_use_the_configured_id_attribute() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("people/p1", json!({"name": "x"})).unwrap();
        let people = SyncedCollection::builder(&context(&store))
            .location("people")
            .config(SyncConfig::new().with_id_attribute("key").with_auto_sync(false))
            .build()
            .unwrap();
        people.fetch(FetchOptions::new()).unwrap();
        let member = people.get("p1").unwrap();
        assert_eq!(member.get("key"), Some(json!("p1")));
        assert_eq!(member.get("id"), None);
    }

    #[test]
    fn collection_payload_round_trips_through_the_funnel() {
        let store = Arc::new(MemoryStore::new());
        let todos = SyncedCollection::builder(&context(&store))
            .location("todos")
            .config(SyncConfig::new().with_auto_sync(false))
            .build()
            .unwrap();
        todos
            .add(vec![json!({"id": "a", "t": 1}).as_object().cloned().unwrap()], SyncOptions::new())
            .unwrap();
        todos.sync(Method::Create, &todos, SyncOptions::new()).unwrap();
        assert_eq!(store.value("todos"), json!({"a": {"t": 1}}));
    }
}
