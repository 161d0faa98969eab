//! Sync controller for a single record.

use super::dispatch::{dispatch, sync, Method, SyncOptions, Syncable};
use super::normalize::{normalize, normalize_snapshot};
use super::resolver::{resolve, Location, ReferenceResolver};
use crate::attributes::Attributes;
use crate::config::{ModelDefaults, SyncConfig, SyncContext};
use crate::error::{SyncError, SyncResult};
use crate::local::{HandlerId, Model, ModelEventKind, SyncGuard};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use treesync_store::{EventType, Reference, Snapshot, StoreResult, Subscription};

/// Where a synced record is stored.
#[derive(Debug, Clone)]
pub enum ModelLocation {
    /// A fixed node.
    Fixed(Location),
    /// The child of a parent node named by the record's identifier.
    Root(String),
}

enum RemoteListener {
    Detached,
    Attaching,
    Attached(Subscription),
}

struct EntityState {
    auto_sync: bool,
    reference: Option<Reference>,
    remote: RemoteListener,
    local: Option<HandlerId>,
    defaults: Option<HandlerId>,
    destroyed: bool,
}

struct SyncedModelInner {
    model: Model,
    resolver: ReferenceResolver,
    location: ModelLocation,
    state: Mutex<EntityState>,
}

impl Drop for SyncedModelInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for handler in [state.local.take(), state.defaults.take()].into_iter().flatten() {
            self.model.off(handler);
        }
        // the remote subscription detaches when `state` drops
    }
}

/// A record kept in sync with one remote node.
///
/// With `auto_sync` on, every local change is pushed and a `value`
/// listener applies remote changes silently, followed by a `sync` event.
/// The listener is attached on first access to the record's reference
/// (through [`reference`](SyncedModel::reference), [`fetch`](SyncedModel::fetch)
/// or [`save`](SyncedModel::save)). With `auto_sync` off the record only
/// talks to the store when asked.
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use treesync_core::{SyncContext, SyncedModel, SyncOptions};
/// use treesync_store::{Database, MemoryStore};
///
/// let store = Arc::new(MemoryStore::new());
/// let context = SyncContext::new().with_database(Database::new(store.clone()));
/// let user = SyncedModel::builder(&context)
///     .url_root("users")
///     .attributes(json!({"name": "ada"}).as_object().cloned().unwrap())
///     .build()
///     .unwrap();
///
/// user.save(SyncOptions::new()).unwrap();
/// let id = user.id().unwrap();
/// assert_eq!(store.value(&format!("users/{id}")), json!({"name": "ada"}));
/// ```
#[derive(Clone)]
pub struct SyncedModel {
    inner: Arc<SyncedModelInner>,
}

/// Builder for [`SyncedModel`].
#[derive(Debug)]
pub struct SyncedModelBuilder {
    context: SyncContext,
    config: SyncConfig,
    defaults: ModelDefaults,
    attributes: Attributes,
    location: Option<ModelLocation>,
}

impl SyncedModelBuilder {
    /// Sets the initial attributes.
    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Stores the record at a fixed location.
    pub fn location(mut self, location: impl Into<Location>) -> Self {
        self.location = Some(ModelLocation::Fixed(location.into()));
        self
    }

    /// Stores the record under `root`, keyed by its identifier.
    pub fn url_root(mut self, root: impl Into<String>) -> Self {
        self.location = Some(ModelLocation::Root(root.into()));
        self
    }

    /// Sets per-record options.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the type defaults.
    pub fn defaults(mut self, defaults: ModelDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Builds the record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingDatabase`] if no database is configured
    /// and [`SyncError::InvalidLocation`] if the location is missing or
    /// malformed.
    pub fn build(self) -> SyncResult<SyncedModel> {
        let resolved = self.config.resolve(&self.defaults, &self.context)?;
        let location = self
            .location
            .ok_or_else(|| SyncError::invalid_location("", "no location given"))?;
        let resolver = ReferenceResolver::new(resolved.database);
        match &location {
            ModelLocation::Fixed(fixed) => resolver.resolve(fixed)?,
            ModelLocation::Root(root) => resolver.resolve(&Location::Text(root.clone()))?,
        };

        let model = Model::with_id_attribute(self.attributes, resolved.id_attribute);
        let entity = SyncedModel {
            inner: Arc::new(SyncedModelInner {
                model,
                resolver,
                location,
                state: Mutex::new(EntityState {
                    auto_sync: false,
                    reference: None,
                    remote: RemoteListener::Detached,
                    local: None,
                    defaults: None,
                    destroyed: false,
                }),
            }),
        };
        if !self.defaults.attributes.is_empty() {
            entity.apply_defaults_after_first_sync(self.defaults.attributes);
        }
        entity.set_auto_sync(resolved.auto_sync);
        Ok(entity)
    }
}

impl SyncedModel {
    /// Starts building a record in `context`.
    pub fn builder(context: &SyncContext) -> SyncedModelBuilder {
        SyncedModelBuilder {
            context: context.clone(),
            config: SyncConfig::new(),
            defaults: ModelDefaults::new(),
            attributes: Attributes::new(),
            location: None,
        }
    }

    /// The local record.
    pub fn model(&self) -> &Model {
        &self.inner.model
    }

    /// The record's identifier.
    pub fn id(&self) -> Option<String> {
        self.inner.model.id()
    }

    /// The value of one attribute.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.model.get(key)
    }

    /// Sets attributes; with `auto_sync` on the change is pushed.
    pub fn set(&self, attributes: Attributes) -> Vec<String> {
        self.inner.model.set(attributes)
    }

    /// Removes an attribute; with `auto_sync` on the removal is pushed.
    pub fn unset(&self, key: &str) -> bool {
        self.inner.model.unset(key)
    }

    /// Whether continuous sync is on.
    pub fn is_auto_sync(&self) -> bool {
        self.inner.state.lock().auto_sync
    }

    /// Turns continuous sync on or off.
    ///
    /// Turning it off detaches the remote listener and stops pushing local
    /// changes. Turning it on resumes pushing; the remote listener is
    /// re-attached on the next reference access.
    pub fn set_auto_sync(&self, enabled: bool) {
        let local = {
            let mut state = self.inner.state.lock();
            if state.auto_sync == enabled {
                return;
            }
            state.auto_sync = enabled;
            state.local.take()
        };
        if enabled {
            let handler = self.listen_local();
            self.inner.state.lock().local = Some(handler);
        } else {
            self.detach_remote();
            if let Some(handler) = local {
                self.inner.model.off(handler);
            }
        }
        debug!(cid = self.inner.model.cid(), auto_sync = enabled, "auto sync changed");
    }

    /// The record's reference.
    ///
    /// The handle is resolved once and cached. `refresh` detaches the
    /// current remote listener and resolves a new handle, which is how an
    /// identifier change moves the record to a new node.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingIdentifier`] for a new record stored
    /// under a root, and [`SyncError::InvalidLocation`] if the location
    /// does not resolve.
    pub fn reference(&self, refresh: bool) -> SyncResult<Reference> {
        let reference = self.resolve_reference(refresh)?;
        self.ensure_remote_listener(&reference);
        Ok(reference)
    }

    /// Reads the record and applies the result.
    ///
    /// The response is applied with change events but without pushing it
    /// back; then `options` success runs and `sync` is emitted.
    ///
    /// # Errors
    ///
    /// As [`reference`](SyncedModel::reference).
    pub fn fetch(&self, options: SyncOptions) -> SyncResult<()> {
        let model = self.inner.model.clone();
        let key = self.reference(false)?.key().map(str::to_string);
        let on_error = options.clone();
        let wrapped = SyncOptions::new()
            .on_success(move |value| match apply_fetched(&model, key.as_deref(), value.clone()) {
                Ok(()) => {
                    options.succeed(value);
                    model.trigger(ModelEventKind::Sync);
                }
                Err(err) => options.fail(err, value),
            })
            .on_error(move |err, value| on_error.fail(err, value));
        sync(Method::Read, self, wrapped)
    }

    /// Writes the record: `create` when new, `update` otherwise.
    ///
    /// A new record stored under a root first receives a push-id. `sync`
    /// is emitted once the write completes.
    ///
    /// # Errors
    ///
    /// As [`reference`](SyncedModel::reference).
    pub fn save(&self, options: SyncOptions) -> SyncResult<()> {
        self.push(false, &[], options)
    }

    /// Deletes the record remotely, detaches its listener, forgets the
    /// cached reference and emits `destroy`.
    ///
    /// A new record stored under a root has no node and is only destroyed
    /// locally.
    ///
    /// # Errors
    ///
    /// As [`reference`](SyncedModel::reference).
    pub fn destroy(&self, options: SyncOptions) -> SyncResult<()> {
        self.inner.state.lock().destroyed = true;
        self.detach_remote();
        let unplaced =
            self.inner.model.is_new() && matches!(self.inner.location, ModelLocation::Root(_));
        let result = if unplaced {
            Ok(())
        } else {
            sync(Method::Delete, self, options)
        };
        // a later access resolves a fresh handle
        self.inner.state.lock().reference = None;
        self.inner.model.destroy();
        result
    }

    /// Detaches every listener the record owns.
    pub fn close(&self) {
        self.set_auto_sync(false);
        let defaults = self.inner.state.lock().defaults.take();
        if let Some(handler) = defaults {
            self.inner.model.off(handler);
        }
    }

    fn resolve_reference(&self, refresh: bool) -> SyncResult<Reference> {
        let cached = self.inner.state.lock().reference.clone();
        match cached {
            Some(reference) if !refresh => Ok(reference),
            _ => {
                self.detach_remote();
                let location = self.current_location()?;
                let reference = self.inner.resolver.refresh(&location)?;
                self.inner.state.lock().reference = Some(reference.clone());
                debug!(cid = self.inner.model.cid(), path = %reference.path(), "reference refreshed");
                Ok(reference)
            }
        }
    }

    fn current_location(&self) -> SyncResult<Location> {
        match &self.inner.location {
            ModelLocation::Fixed(location) => Ok(location.clone()),
            ModelLocation::Root(root) => {
                let id = self.inner.model.id().ok_or(SyncError::MissingIdentifier)?;
                Ok(Location::Text(format!("{}/{id}", root.trim_end_matches('/'))))
            }
        }
    }

    /// Gives a new record stored under a root a push-id.
    fn assign_push_id(&self) -> SyncResult<bool> {
        let ModelLocation::Root(root) = &self.inner.location else {
            return Ok(false);
        };
        let parent = resolve(self.inner.resolver.database(), &Location::Text(root.clone()))?;
        let child = parent.push();
        let key = child.key().ok_or(SyncError::MissingIdentifier)?;
        let mut id = Attributes::new();
        id.insert(
            self.inner.model.id_attribute().to_string(),
            Value::String(key.to_string()),
        );
        self.inner.model.set_silent(id);
        trace!(cid = self.inner.model.cid(), key, "assigned push-id");
        Ok(true)
    }

    /// Writes the record; `removed` keys are cleared remotely by an update.
    fn push(&self, refresh: bool, removed: &[String], options: SyncOptions) -> SyncResult<()> {
        let was_new = self.inner.model.is_new();
        let assigned = was_new && self.assign_push_id()?;
        let mut payload = self.sync_payload();
        if let Value::Object(values) = &mut payload {
            for key in removed {
                values.insert(key.clone(), Value::Null);
            }
        }
        let reference = self.resolve_reference(refresh || assigned)?;
        let method = if was_new { Method::Create } else { Method::Update };
        let model = self.inner.model.clone();
        let options = options.then(move |_| model.trigger(ModelEventKind::Sync));
        dispatch(method, &reference, payload, options);
        // attach after the write so the first value event already carries it
        self.ensure_remote_listener(&reference);
        Ok(())
    }

    fn ensure_remote_listener(&self, reference: &Reference) {
        {
            let mut state = self.inner.state.lock();
            if !state.auto_sync
                || state.destroyed
                || !matches!(state.remote, RemoteListener::Detached)
            {
                return;
            }
            state.remote = RemoteListener::Attaching;
        }

        let weak: Weak<SyncedModelInner> = Arc::downgrade(&self.inner);
        let subscription = reference.on(EventType::Value, move |result| {
            if let Some(inner) = weak.upgrade() {
                SyncedModel { inner }.on_remote_value(result);
            }
        });

        let stale = {
            let mut state = self.inner.state.lock();
            let current = state.reference.as_ref() == Some(reference);
            if current && matches!(state.remote, RemoteListener::Attaching) {
                state.remote = RemoteListener::Attached(subscription);
                None
            } else {
                Some(subscription)
            }
        };
        if let Some(subscription) = stale {
            subscription.cancel();
        }
    }

    fn detach_remote(&self) {
        let previous = std::mem::replace(
            &mut self.inner.state.lock().remote,
            RemoteListener::Detached,
        );
        if let RemoteListener::Attached(subscription) = previous {
            subscription.cancel();
        }
    }

    fn listen_local(&self) -> HandlerId {
        let weak: Weak<SyncedModelInner> = Arc::downgrade(&self.inner);
        self.inner.model.on(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let entity = SyncedModel { inner };
            match &event.kind {
                ModelEventKind::Change { changed } => entity.on_local_change(changed),
                ModelEventKind::Destroy => entity.on_local_destroy(),
                _ => {}
            }
        })
    }

    /// Options that surface a failed background write as `core:error`.
    fn report(&self, operation: &'static str) -> SyncOptions {
        let model = self.inner.model.clone();
        SyncOptions::new().or_else(move |err| {
            model.trigger(ModelEventKind::Error {
                operation: operation.to_string(),
                error: err.clone(),
            });
        })
    }

    fn on_local_change(&self, changed: &[String]) {
        let model = &self.inner.model;
        if model.sync_guard() == SyncGuard::RemoteApplying {
            trace!(cid = model.cid(), "change from remote, not pushed");
            return;
        }
        {
            let state = self.inner.state.lock();
            if !state.auto_sync || state.destroyed {
                return;
            }
        }
        let id_changed = changed.iter().any(|key| key == model.id_attribute());
        let removed: Vec<String> = changed
            .iter()
            .filter(|key| !model.has(key))
            .cloned()
            .collect();
        let operation = if model.is_new() { "create" } else { "update" };
        if let Err(err) = self.push(id_changed, &removed, self.report(operation)) {
            warn!(cid = model.cid(), error = %err, "could not push local change");
            model.trigger(ModelEventKind::Error {
                operation: "save".to_string(),
                error: err,
            });
        }
    }

    fn on_local_destroy(&self) {
        let (first, auto_sync) = {
            let mut state = self.inner.state.lock();
            let first = !state.destroyed;
            state.destroyed = true;
            (first, state.auto_sync)
        };
        self.detach_remote();
        if first && auto_sync {
            if let Err(err) = sync(Method::Delete, self, self.report("delete")) {
                warn!(cid = self.inner.model.cid(), error = %err, "could not delete record");
                self.inner.model.trigger(ModelEventKind::Error {
                    operation: "destroy".to_string(),
                    error: err,
                });
            }
        }
    }

    fn on_remote_value(&self, result: StoreResult<Snapshot>) {
        let model = &self.inner.model;
        let applied = result
            .map_err(SyncError::from)
            .and_then(|snapshot| normalize_snapshot(&snapshot, model.id_attribute()));
        match applied {
            Ok(record) => {
                for key in model.attributes().keys() {
                    if !record.contains_key(key) {
                        model.unset_silent(key);
                    }
                }
                model.set_silent(record);
                model.trigger(ModelEventKind::Sync);
            }
            Err(err) => {
                warn!(cid = model.cid(), error = %err, "value listener failed");
                if matches!(err, SyncError::Store(_)) {
                    // the store drops a listener it reports an error to
                    let _stale = std::mem::replace(
                        &mut self.inner.state.lock().remote,
                        RemoteListener::Detached,
                    );
                }
                model.trigger(ModelEventKind::Error {
                    operation: EventType::Value.as_str().to_string(),
                    error: err,
                });
            }
        }
    }

    fn apply_defaults_after_first_sync(&self, defaults: Attributes) {
        let weak: Weak<SyncedModelInner> = Arc::downgrade(&self.inner);
        let handler = self.inner.model.on(move |event| {
            if !matches!(event.kind, ModelEventKind::Sync) {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Some(handler) = inner.state.lock().defaults.take() else {
                return;
            };
            inner.model.off(handler);
            let current = inner.model.attributes();
            let missing: Attributes = defaults
                .iter()
                .filter(|(key, _)| !current.contains_key(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            inner.model.set(missing);
        });
        self.inner.state.lock().defaults = Some(handler);
    }
}

/// Applies a fetched value without pushing it back.
fn apply_fetched(model: &Model, key: Option<&str>, value: Value) -> SyncResult<()> {
    let record = match key {
        Some(key) => normalize(value, key, model.id_attribute())?,
        None => match value {
            Value::Object(record) => record,
            Value::Null => Attributes::new(),
            _ => {
                return Err(SyncError::InvalidIdentifier {
                    key: String::new(),
                })
            }
        },
    };
    let _guard = model.begin_remote_apply();
    model.set(record);
    Ok(())
}

/// The record without its identifier; the node key carries it.
pub(crate) fn payload_of(model: &Model) -> Value {
    let mut attributes = model.attributes();
    attributes.remove(model.id_attribute());
    Value::Object(attributes)
}

impl Syncable for SyncedModel {
    fn sync_reference(&self) -> SyncResult<Reference> {
        self.reference(false)
    }

    fn sync_payload(&self) -> Value {
        payload_of(&self.inner.model)
    }
}

impl fmt::Debug for SyncedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedModel")
            .field("model", &self.inner.model)
            .field("location", &self.inner.location)
            .field("auto_sync", &self.is_auto_sync())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use treesync_store::{Database, MemoryStore, StoreError, WriteKind};

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, SyncContext) {
        let store = Arc::new(MemoryStore::new());
        let context = SyncContext::new().with_database(Database::new(store.clone()));
        (store, context)
    }

    fn events(model: &Model) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        model.on(move |event| sink.lock().push(event.name().to_string()));
        seen
    }

    #[test]
    fn build_errors() {
        let err = SyncedModel::builder(&SyncContext::new())
            .location("users/a")
            .build()
            .unwrap_err();
        assert_eq!(err, SyncError::MissingDatabase);

        let (_, context) = setup();
        let err = SyncedModel::builder(&context).build().unwrap_err();
        assert!(matches!(err, SyncError::InvalidLocation { .. }));

        let err = SyncedModel::builder(&context)
            .location("users/a.b")
            .build()
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidLocation { .. }));
    }

    #[test]
    fn save_new_record_under_root_assigns_push_id() {
        let (store, context) = setup();
        let entity = SyncedModel::builder(&context)
            .url_root("todos")
            .attributes(attrs(json!({"name": "a"})))
            .build()
            .unwrap();
        assert!(entity.id().is_none());
        assert!(matches!(
            entity.reference(false),
            Err(SyncError::MissingIdentifier)
        ));

        entity.save(SyncOptions::new()).unwrap();
        let id = entity.id().unwrap();
        assert_eq!(id.len(), 20);
        assert_eq!(store.value(&format!("todos/{id}")), json!({"name": "a"}));
        assert_eq!(entity.get("name"), Some(json!("a")));
        assert_eq!(store.writes()[0].kind, WriteKind::Set);
    }

    #[test]
    fn local_changes_push_once() {
        let (store, context) = setup();
        store.remote_set("users/u1", json!({"a": 1, "b": 2})).unwrap();
        let entity = SyncedModel::builder(&context)
            .url_root("users")
            .attributes(attrs(json!({"id": "u1"})))
            .build()
            .unwrap();
        entity.reference(false).unwrap();
        assert_eq!(entity.get("a"), Some(json!(1)));
        store.clear_writes();

        entity.set(attrs(json!({"a": 5})));
        assert_eq!(store.value("users/u1"), json!({"a": 5, "b": 2}));
        assert_eq!(store.writes().len(), 1);
        assert_eq!(store.writes()[0].kind, WriteKind::Update);

        entity.unset("b");
        assert_eq!(store.value("users/u1"), json!({"a": 5}));
        assert_eq!(store.writes().len(), 2);
    }

    #[test]
    fn remote_values_apply_silently() {
        let (store, context) = setup();
        store.remote_set("users/u1", json!({"a": 1, "b": 2})).unwrap();
        let entity = SyncedModel::builder(&context)
            .location("users/u1")
            .build()
            .unwrap();
        let seen = events(entity.model());
        entity.reference(false).unwrap();
        assert_eq!(entity.id().as_deref(), Some("u1"));

        store.remote_set("users/u1", json!({"a": 3})).unwrap();
        assert_eq!(entity.get("a"), Some(json!(3)));
        assert_eq!(entity.get("b"), None);
        assert_eq!(*seen.lock(), vec!["sync", "sync"]);
        assert_eq!(store.writes().len(), 2);
    }

    #[test]
    fn disabling_auto_sync_twice_is_idempotent() {
        let (store, context) = setup();
        let entity = SyncedModel::builder(&context)
            .location("users/u1")
            .build()
            .unwrap();
        entity.reference(false).unwrap();
        assert_eq!(store.listener_count(), 1);

        entity.set_auto_sync(false);
        entity.set_auto_sync(false);
        assert!(!entity.is_auto_sync());
        assert_eq!(store.listener_count(), 0);

        store.clear_writes();
        entity.set(attrs(json!({"a": 1})));
        assert!(store.writes().is_empty());

        entity.set_auto_sync(true);
        assert_eq!(store.listener_count(), 0);
        entity.reference(false).unwrap();
        assert_eq!(store.listener_count(), 1);
    }

    #[test]
    fn identifier_change_moves_the_record() {
        let (store, context) = setup();
        let entity = SyncedModel::builder(&context)
            .url_root("users")
            .attributes(attrs(json!({"id": "old", "name": "n"})))
            .build()
            .unwrap();
        entity.save(SyncOptions::new()).unwrap();
        assert_eq!(store.listener_count_at("users/old"), 1);

        entity.set(attrs(json!({"id": "new"})));
        assert_eq!(store.listener_count_at("users/old"), 0);
        assert_eq!(store.listener_count_at("users/new"), 1);
        assert_eq!(store.value("users/new"), json!({"name": "n"}));
        assert_eq!(entity.get("name"), Some(json!("n")));
    }

    #[test]
    fn fetch_applies_then_syncs() {
        let (store, context) = setup();
        store.remote_set("cfg", json!({"theme": "dark"})).unwrap();
        let entity = SyncedModel::builder(&context)
            .location("cfg")
            .config(SyncConfig::new().with_auto_sync(false))
            .build()
            .unwrap();
        let seen = events(entity.model());
        let order = Arc::clone(&seen);
        entity
            .fetch(SyncOptions::new().on_success(move |_| order.lock().push("success".into())))
            .unwrap();
        assert_eq!(entity.get("theme"), Some(json!("dark")));
        assert_eq!(entity.id().as_deref(), Some("cfg"));
        assert_eq!(*seen.lock(), vec!["change", "success", "sync"]);
        assert_eq!(store.listener_count(), 0);
        assert_eq!(store.writes().len(), 1);
    }

    #[test]
    fn destroy_deletes_and_detaches() {
        let (store, context) = setup();
        store.remote_set("users/u1", json!({"a": 1})).unwrap();
        let entity = SyncedModel::builder(&context)
            .location("users/u1")
            .build()
            .unwrap();
        entity.reference(false).unwrap();
        let seen = events(entity.model());

        entity.destroy(SyncOptions::new()).unwrap();
        assert_eq!(store.value("users"), Value::Null);
        assert_eq!(store.listener_count(), 0);
        assert_eq!(*seen.lock(), vec!["destroy"]);
    }

    #[test]
    fn plain_model_destroy_deletes_remotely() {
        let (store, context) = setup();
        store.remote_set("users/u1", json!({"a": 1})).unwrap();
        let entity = SyncedModel::builder(&context)
            .location("users/u1")
            .build()
            .unwrap();
        entity.reference(false).unwrap();
        entity.model().destroy();
        assert_eq!(store.value("users/u1"), Value::Null);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn defaults_fill_missing_keys_after_first_sync() {
        let (store, context) = setup();
        store.remote_set("users/u1", json!({"name": "x"})).unwrap();
        let entity = SyncedModel::builder(&context)
            .location("users/u1")
            .defaults(ModelDefaults::new().with_attributes(attrs(json!({"name": "?", "role": "guest"}))))
            .build()
            .unwrap();
        assert_eq!(entity.get("role"), None);

        entity.reference(false).unwrap();
        assert_eq!(entity.get("name"), Some(json!("x")));
        assert_eq!(entity.get("role"), Some(json!("guest")));
        assert_eq!(store.value("users/u1"), json!({"name": "x", "role": "guest"}));
    }

    #[test]
    fn listener_failures_become_error_events() {
        let (store, context) = setup();
        store.deny("secret").unwrap();
        let entity = SyncedModel::builder(&context)
            .location("secret/doc")
            .build()
            .unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        entity.model().on(move |event| {
            if let ModelEventKind::Error { operation, error } = &event.kind {
                sink.lock().push((operation.clone(), error.clone()));
            }
        });
        entity.reference(false).unwrap();

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "value");
        assert!(matches!(
            errors[0].1,
            SyncError::Store(StoreError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn failed_background_writes_become_error_events() {
        let (store, context) = setup();
        store.remote_set("users/u1", json!({"a": 1})).unwrap();
        let entity = SyncedModel::builder(&context)
            .location("users/u1")
            .build()
            .unwrap();
        entity.reference(false).unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        entity.model().on(move |event| {
            if let ModelEventKind::Error { operation, error } = &event.kind {
                sink.lock().push((operation.clone(), error.clone()));
            }
        });

        store.set_connected(false);
        entity.set(attrs(json!({"a": 2})));
        entity.model().destroy();
        store.set_connected(true);

        assert_eq!(entity.get("a"), Some(json!(2)));
        assert_eq!(store.value("users/u1"), json!({"a": 1}));
        let errors = errors.lock();
        let operations: Vec<&str> = errors.iter().map(|(op, _)| op.as_str()).collect();
        assert_eq!(operations, vec!["update", "delete"]);
        assert!(errors
            .iter()
            .all(|(_, err)| *err == SyncError::Store(StoreError::Disconnected)));
    }

    #[test]
    fn dropping_the_record_detaches_its_listener() {
        let (store, context) = setup();
        {
            let entity = SyncedModel::builder(&context)
                .location("users/u1")
                .build()
                .unwrap();
            entity.reference(false).unwrap();
            assert_eq!(store.listener_count(), 1);
        }
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn primitive_values_are_reported() {
        let (store, context) = setup();
        store.remote_set("flag", json!(true)).unwrap();
        let entity = SyncedModel::builder(&context).location("flag").build().unwrap();
        let seen = events(entity.model());
        entity.reference(false).unwrap();
        assert_eq!(*seen.lock(), vec!["core:error"]);
    }

    #[test]
    fn close_detaches_everything() {
        let (store, context) = setup();
        let entity = SyncedModel::builder(&context)
            .location("users/u1")
            .build()
            .unwrap();
        entity.reference(false).unwrap();
        entity.close();
        assert_eq!(store.listener_count(), 0);
        entity.set(attrs(json!({"a": 1})));
        assert_eq!(store.value("users/u1"), Value::Null);
    }
}
