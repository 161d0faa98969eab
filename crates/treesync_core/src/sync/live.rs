//! Continuous collection strategy.

use super::dispatch::{Method, SyncOptions};
use super::echo::{EchoGuard, EchoKind, EchoToken};
use super::normalize::normalize_snapshot;
use super::relay::completion_for;
use super::strategy::{
    record_payload, CollectionCore, CollectionSyncStrategy, CollectionTarget, FetchOptions,
    Notify, SyncMode,
};
use crate::attributes::{compare_attributes, Attributes, PRIORITY_KEY};
use crate::error::{SyncError, SyncResult};
use crate::local::{CollectionEvent, HandlerId, Model, ModelEventKind, SyncGuard};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use treesync_store::{EventType, Reference, Snapshot, StoreResult, Subscription};

/// Child events a live collection listens to, in attach order.
const CHILD_LISTENERS: [EventType; 4] = [
    EventType::ChildAdded,
    EventType::ChildMoved,
    EventType::ChildChanged,
    EventType::ChildRemoved,
];

#[derive(Default)]
struct LiveState {
    local: Option<HandlerId>,
    subscriptions: Vec<Subscription>,
}

/// Keeps a collection's membership equal to the remote child set.
///
/// Local edits are written per child as they happen: `add` and `remove`
/// write the child nodes, member changes push the difference from the last
/// remote state, and destroying a member drops it and deletes its node.
/// Otherwise the local membership only changes when the child listeners
/// report it, so a local `add` appears once its `child_added` arrives. A silent write arms
/// an [`EchoGuard`] token so that arrival is applied without events.
pub struct LiveStrategy {
    core: Arc<CollectionCore>,
    echoes: EchoGuard,
    state: Mutex<LiveState>,
    this: Weak<LiveStrategy>,
}

impl LiveStrategy {
    pub(crate) fn new(core: Arc<CollectionCore>) -> Arc<Self> {
        let strategy = Arc::new_cyclic(|weak: &Weak<Self>| Self {
            core,
            echoes: EchoGuard::new(),
            state: Mutex::new(LiveState::default()),
            this: weak.clone(),
        });
        let weak = strategy.this.clone();
        let handler = strategy.core.collection.on(move |event| {
            let Some(strategy) = weak.upgrade() else {
                return;
            };
            match event {
                CollectionEvent::Change { model, .. } => strategy.update_model(model),
                CollectionEvent::Destroy { model } => strategy.remove_model(model),
                _ => {}
            }
        });
        strategy.state.lock().local = Some(handler);
        strategy
    }

    /// Outstanding echo tokens.
    pub fn pending_echoes(&self) -> usize {
        self.echoes.pending()
    }

    /// Whether the child listeners are attached.
    pub fn is_listening(&self) -> bool {
        !self.state.lock().subscriptions.is_empty()
    }

    /// Options reporting a failed write as `core:error`.
    fn report(&self, operation: &'static str) -> SyncOptions {
        let collection = self.core.collection.clone();
        SyncOptions::new().or_else(move |err| {
            collection.trigger(CollectionEvent::Error {
                operation: operation.to_string(),
                error: err.clone(),
            });
        })
    }

    /// Options that disarm `token` when the write completes, after `options`.
    fn disarming(&self, options: SyncOptions, token: Option<EchoToken>) -> SyncOptions {
        let Some(token) = token else {
            return options;
        };
        let weak = self.this.clone();
        let failed = token.clone();
        let weak_failed = self.this.clone();
        options
            .then(move |_| {
                if let Some(strategy) = weak.upgrade() {
                    strategy.echoes.disarm(&token);
                }
            })
            .or_else(move |_| {
                if let Some(strategy) = weak_failed.upgrade() {
                    strategy.echoes.disarm(&failed);
                }
            })
    }

    fn write_child(
        &self,
        key: &str,
        value: Value,
        notify: Notify,
        kind: EchoKind,
        options: SyncOptions,
    ) -> SyncResult<()> {
        let reference = self.core.child(key)?;
        let token = notify.is_silent().then(|| self.echoes.arm(kind, key));
        let options = self.disarming(options, token);
        reference.set(value.clone(), completion_for(value, options));
        Ok(())
    }

    /// Pushes a member's local changes.
    fn update_model(&self, model: &Model) {
        if model.sync_guard() == SyncGuard::RemoteApplying {
            trace!(cid = model.cid(), "remote change applied, not pushed");
            return;
        }
        let Some(id) = model.id() else {
            return;
        };
        let shadow = model.remote_shadow().unwrap_or_default();
        let local = model.attributes();
        let diff = compare_attributes(&shadow, &local);
        if diff.is_empty() {
            return;
        }
        let reference = match self.core.child(&id) {
            Ok(reference) => reference,
            Err(err) => {
                warn!(id = %id, error = %err, "member cannot be written");
                self.core.collection.trigger(CollectionEvent::Error {
                    operation: Method::Update.as_str().to_string(),
                    error: err,
                });
                return;
            }
        };
        let options = self.report("update");
        if diff.contains_key(PRIORITY_KEY) {
            // a priority change cannot be merged
            let mut record = local;
            let priority = record.remove(PRIORITY_KEY).filter(|p| !p.is_null());
            let payload = record_payload(record, self.core.id_attribute());
            debug!(id = %id, "pushing member with priority");
            match priority {
                Some(priority) => reference.set_with_priority(
                    payload.clone(),
                    priority,
                    completion_for(payload, options),
                ),
                None => reference.set(payload.clone(), completion_for(payload, options)),
            }
        } else {
            debug!(id = %id, keys = diff.len(), "pushing member diff");
            let item = Value::Object(diff.clone());
            reference.update(diff, completion_for(item, options));
        }
    }

    /// Drops a destroyed member, then deletes its node.
    ///
    /// The member leaves the collection with a `remove` event straight
    /// away; the matching `child_removed` echo is swallowed.
    fn remove_model(&self, model: &Model) {
        let Some(id) = model.id() else {
            return;
        };
        self.core.collection.remove(&[id.clone()]);
        if let Err(err) = self.write_child(
            &id,
            Value::Null,
            Notify::Silent,
            EchoKind::Removed,
            self.report("destroy"),
        ) {
            warn!(id = %id, error = %err, "member cannot be deleted");
            self.core.collection.trigger(CollectionEvent::Error {
                operation: Method::Delete.as_str().to_string(),
                error: err,
            });
        }
    }

    fn attach_children(&self, reference: &Reference) {
        let mut subscriptions = Vec::with_capacity(CHILD_LISTENERS.len());
        for event in CHILD_LISTENERS {
            let weak = self.this.clone();
            subscriptions.push(reference.on(event, move |result| {
                if let Some(strategy) = weak.upgrade() {
                    strategy.on_child(event, result);
                }
            }));
        }
        debug!(path = %reference.path(), "child listeners attached");
        self.state.lock().subscriptions.extend(subscriptions);
    }

    fn detach_children(&self) {
        let subscriptions = std::mem::take(&mut self.state.lock().subscriptions);
        if !subscriptions.is_empty() {
            debug!(count = subscriptions.len(), "child listeners detached");
        }
        for subscription in subscriptions {
            subscription.cancel();
        }
    }

    fn on_child(&self, event: EventType, result: StoreResult<Snapshot>) {
        let outcome = result.map_err(SyncError::from).and_then(|snapshot| match event {
            EventType::ChildAdded => self.child_added(&snapshot),
            EventType::ChildChanged => self.child_changed(&snapshot),
            EventType::ChildRemoved => self.child_removed(&snapshot),
            EventType::ChildMoved | EventType::Value => {
                trace!(key = ?snapshot.key(), event = %event, "ignored");
                Ok(())
            }
        });
        if let Err(err) = outcome {
            warn!(event = %event, error = %err, "child listener failed");
            self.core.collection.trigger(CollectionEvent::Error {
                operation: event.as_str().to_string(),
                error: err,
            });
        }
    }

    fn child_added(&self, snapshot: &Snapshot) -> SyncResult<()> {
        let record = normalize_snapshot(snapshot, self.core.id_attribute())?;
        let key = snapshot.key().ok_or(SyncError::MissingIdentifier)?;
        let collection = &self.core.collection;
        let models = if self.echoes.consume(EchoKind::Added, key) {
            trace!(key, "suppressed add echo");
            collection.add_silent(vec![record.clone()])
        } else {
            collection.add(vec![record.clone()])
        };
        for model in models {
            model.set_remote_shadow(record.clone());
        }
        Ok(())
    }

    fn child_changed(&self, snapshot: &Snapshot) -> SyncResult<()> {
        let record = normalize_snapshot(snapshot, self.core.id_attribute())?;
        let key = snapshot.key().ok_or(SyncError::MissingIdentifier)?;
        let Some(model) = self.core.collection.get(key) else {
            debug!(key, "changed before added");
            return self.child_added(snapshot);
        };

        let _guard = model.begin_remote_apply();
        model.set_remote_shadow(record.clone());
        for local in model.attributes().keys() {
            if !record.contains_key(local) {
                model.unset(local);
            }
        }
        model.set(record);
        self.core.collection.trigger(CollectionEvent::Sync);
        Ok(())
    }

    fn child_removed(&self, snapshot: &Snapshot) -> SyncResult<()> {
        let key = snapshot.key().ok_or(SyncError::MissingIdentifier)?;
        let ids = [key.to_string()];
        if self.echoes.consume(EchoKind::Removed, key) {
            trace!(key, "suppressed remove echo");
            self.core.collection.remove_silent(&ids);
        } else {
            self.core.collection.trigger(CollectionEvent::Sync);
            self.core.collection.remove(&ids);
        }
        Ok(())
    }
}

impl CollectionSyncStrategy for LiveStrategy {
    fn mode(&self) -> SyncMode {
        SyncMode::Live
    }

    fn reference(&self, refresh: bool) -> SyncResult<Reference> {
        if !refresh {
            return self.core.reference(false);
        }
        let listening = self.is_listening();
        self.detach_children();
        let reference = self.core.reference(true)?;
        if listening {
            self.attach_children(&reference);
        }
        Ok(reference)
    }

    fn fetch(&self, options: FetchOptions) -> SyncResult<()> {
        let FetchOptions { reset, options } = options;
        if reset || !self.is_listening() {
            self.detach_children();
            let reference = self.core.reference(reset)?;
            self.attach_children(&reference);
        }

        let on_error = options.clone();
        let loaded = self.core.collection.clone();
        let failed = self.core.collection.clone();
        let wrapped = SyncOptions::new()
            .on_success(move |value| {
                options.succeed(value);
                loaded.trigger(CollectionEvent::Sync);
            })
            .on_error(move |err, value| {
                failed.trigger(CollectionEvent::Error {
                    operation: EventType::Value.as_str().to_string(),
                    error: err.clone(),
                });
                on_error.fail(err, value);
            });
        self.sync(Method::Read, &CollectionTarget { core: &self.core }, wrapped)
    }

    fn add(
        &self,
        records: Vec<Attributes>,
        notify: Notify,
        options: SyncOptions,
    ) -> SyncResult<Vec<Attributes>> {
        let prepared = self.core.prepare_records(records)?;
        let id_attribute = self.core.id_attribute().to_string();
        let mut added = Vec::with_capacity(prepared.len());
        for (key, record) in prepared {
            let payload = record_payload(record.clone(), &id_attribute);
            self.write_child(&key, payload, notify, EchoKind::Added, options.clone())?;
            added.push(record);
        }
        Ok(added)
    }

    fn create(&self, record: Attributes, options: SyncOptions) -> SyncResult<Attributes> {
        self.add(vec![record], Notify::Emit, options)?
            .pop()
            .ok_or(SyncError::MissingIdentifier)
    }

    fn remove(&self, ids: &[String], notify: Notify, options: SyncOptions) -> SyncResult<()> {
        for id in ids {
            self.write_child(id, Value::Null, notify, EchoKind::Removed, options.clone())?;
        }
        Ok(())
    }

    fn reset(&self, records: Vec<Attributes>, notify: Notify) -> SyncResult<Vec<Attributes>> {
        let current = self.core.collection.ids();
        self.remove(&current, Notify::Silent, SyncOptions::new())?;
        let added = self.add(records, Notify::Silent, SyncOptions::new())?;
        if !notify.is_silent() {
            self.core.collection.trigger(CollectionEvent::Reset);
        }
        Ok(added)
    }

    fn save(&self, model: &Model, options: SyncOptions) -> SyncResult<()> {
        let id = model.id().ok_or(SyncError::MissingIdentifier)?;
        let mut record = model.attributes();
        let priority = record.remove(PRIORITY_KEY).filter(|p| !p.is_null());
        let payload = record_payload(record, self.core.id_attribute());
        let reference = self.core.child(&id)?;
        let synced = model.clone();
        let options = options.then(move |_| synced.trigger(ModelEventKind::Sync));
        match priority {
            Some(priority) => reference.set_with_priority(
                payload.clone(),
                priority,
                completion_for(payload, options),
            ),
            None => reference.set(payload.clone(), completion_for(payload, options)),
        }
        Ok(())
    }

    fn close(&self) {
        self.detach_children();
        let handler = self.state.lock().local.take();
        if let Some(handler) = handler {
            self.core.collection.off(handler);
        }
    }
}

impl Drop for LiveStrategy {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LiveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStrategy")
            .field("core", &self.core)
            .field("listening", &self.is_listening())
            .field("pending_echoes", &self.echoes.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::Collection;
    use crate::sync::resolver::{Location, ReferenceResolver};
    use serde_json::json;
    use treesync_store::{Database, MemoryStore, StoreError, WriteKind};

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn live(store: &Arc<MemoryStore>) -> Arc<LiveStrategy> {
        let core = CollectionCore::new(
            Collection::new(),
            Location::from("todos"),
            ReferenceResolver::new(Database::new(store.clone())),
        );
        LiveStrategy::new(Arc::new(core))
    }

    fn names(strategy: &LiveStrategy) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        strategy
            .core
            .collection
            .on(move |event| sink.lock().push(event.name().to_string()));
        seen
    }

    #[test]
    fn fetch_attaches_listeners_and_loads() {
        let store = Arc::new(MemoryStore::new());
        store
            .remote_set("todos", json!({"a": {"t": 1}, "b": {"t": 2}}))
            .unwrap();
        let strategy = live(&store);
        let seen = names(&strategy);
        let loaded = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&loaded);
        strategy
            .fetch(FetchOptions::new().with_options(
                SyncOptions::new().on_success(move |_| *flag.lock() = true),
            ))
            .unwrap();

        assert!(*loaded.lock());
        assert_eq!(store.listener_count_at("todos"), 4);
        assert_eq!(strategy.core.collection.ids(), vec!["a", "b"]);
        assert_eq!(*seen.lock(), vec!["add", "add", "sync"]);

        strategy.fetch(FetchOptions::new()).unwrap();
        assert_eq!(store.listener_count_at("todos"), 4);
        strategy.fetch(FetchOptions::new().with_reset(true)).unwrap();
        assert_eq!(store.listener_count_at("todos"), 4);
    }

    #[test]
    fn silent_add_does_not_echo() {
        let store = Arc::new(MemoryStore::new());
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);

        let added = strategy
            .add(vec![attrs(json!({"t": 1}))], Notify::Silent, SyncOptions::new())
            .unwrap();
        let id = added[0]["id"].as_str().unwrap().to_string();
        assert!(strategy.core.collection.get(&id).is_some());
        assert!(seen.lock().is_empty());
        assert_eq!(strategy.pending_echoes(), 0);
        assert_eq!(store.value(&format!("todos/{id}")), json!({"t": 1}));
    }

    #[test]
    fn emitting_add_is_announced_once() {
        let store = Arc::new(MemoryStore::new());
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);
        strategy
            .add(vec![attrs(json!({"id": "x"}))], Notify::Emit, SyncOptions::new())
            .unwrap();
        assert_eq!(*seen.lock(), vec!["add"]);
    }

    #[test]
    fn failed_silent_write_clears_its_token() {
        let store = Arc::new(MemoryStore::new());
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        store.deny("todos/x").unwrap();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        strategy
            .add(
                vec![attrs(json!({"id": "x"}))],
                Notify::Silent,
                SyncOptions::new().on_error(move |err, _| sink.lock().push(err)),
            )
            .unwrap();
        assert_eq!(strategy.pending_echoes(), 0);
        assert!(matches!(
            failures.lock()[0],
            SyncError::Store(StoreError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn removed_key_is_pushed_as_null() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/r", json!({"a": 1, "b": 2})).unwrap();
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        store.clear_writes();

        let model = strategy.core.collection.get("r").unwrap();
        model.unset("b");
        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].kind, WriteKind::Update);
        assert_eq!(writes[0].value, json!({"b": null}));
        assert_eq!(store.value("todos/r"), json!({"a": 1}));
    }

    #[test]
    fn remote_changes_are_not_pushed_back() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/r", json!({"a": 1, "b": 2})).unwrap();
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);
        store.clear_writes();

        store.remote_set("todos/r", json!({"a": 5})).unwrap();
        let model = strategy.core.collection.get("r").unwrap();
        assert_eq!(model.get("a"), Some(json!(5)));
        assert_eq!(model.get("b"), None);
        assert_eq!(store.writes().len(), 1);
        assert_eq!(*seen.lock(), vec!["change", "change", "sync"]);
        assert_eq!(model.sync_guard(), SyncGuard::Idle);
    }

    #[test]
    fn remote_removal_syncs_then_removes() {
        let store = Arc::new(MemoryStore::new());
        store
            .remote_set("todos", json!({"a": {"t": 1}, "b": {"t": 2}}))
            .unwrap();
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);

        store.remote_remove("todos/a").unwrap();
        assert_eq!(strategy.core.collection.ids(), vec!["b"]);
        assert_eq!(*seen.lock(), vec!["sync", "remove"]);
    }

    #[test]
    fn silent_remove_is_not_announced() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/a", json!({"t": 1})).unwrap();
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);
        strategy
            .remove(&["a".to_string()], Notify::Silent, SyncOptions::new())
            .unwrap();
        assert!(strategy.core.collection.is_empty());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn destroy_deletes_member_node() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/a", json!({"t": 1})).unwrap();
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);
        strategy.core.collection.get("a").unwrap().destroy();
        assert_eq!(store.value("todos/a"), Value::Null);
        assert!(strategy.core.collection.is_empty());
        assert_eq!(*seen.lock(), vec!["remove", "destroy"]);
        assert_eq!(strategy.pending_echoes(), 0);
    }

    #[test]
    fn failed_member_delete_releases_its_echo_token() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/a", json!({"t": 1})).unwrap();
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);

        store.set_connected(false);
        strategy.core.collection.get("a").unwrap().destroy();
        store.set_connected(true);

        assert_eq!(store.value("todos/a"), json!({"t": 1}));
        assert!(strategy.core.collection.is_empty());
        assert_eq!(strategy.pending_echoes(), 0);
        assert_eq!(*seen.lock(), vec!["remove", "core:error", "destroy"]);
    }

    #[test]
    fn reset_replaces_remotely_and_emits_once() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/a", json!({"t": 1})).unwrap();
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);

        strategy
            .reset(vec![attrs(json!({"id": "z", "t": 9}))], Notify::Emit)
            .unwrap();
        assert_eq!(store.value("todos"), json!({"z": {"t": 9}}));
        assert_eq!(strategy.core.collection.ids(), vec!["z"]);
        assert_eq!(*seen.lock(), vec!["reset"]);
    }

    #[test]
    fn priority_change_uses_full_write() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/p", json!({"t": 1})).unwrap();
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        store.clear_writes();

        let model = strategy.core.collection.get("p").unwrap();
        model.set(attrs(json!({".priority": 3})));
        let writes = store.writes();
        assert_eq!(writes[0].kind, WriteKind::SetWithPriority);
        assert_eq!(writes[0].value, json!({"t": 1}));
        assert_eq!(writes[0].priority, Some(json!(3)));
        assert_eq!(store.priority("todos/p"), Some(json!(3)));
    }

    #[test]
    fn listener_errors_are_tagged() {
        let store = Arc::new(MemoryStore::new());
        store.deny("todos").unwrap();
        let strategy = live(&store);
        let operations = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&operations);
        strategy.core.collection.on(move |event| {
            if let CollectionEvent::Error { operation, .. } = event {
                sink.lock().push(operation.clone());
            }
        });
        strategy.fetch(FetchOptions::new()).unwrap();
        assert_eq!(
            *operations.lock(),
            vec!["child_added", "child_moved", "child_changed", "child_removed", "value"]
        );
    }

    #[test]
    fn close_detaches_everything() {
        let store = Arc::new(MemoryStore::new());
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        strategy.close();
        assert_eq!(store.listener_count(), 0);
        assert!(!strategy.is_listening());
    }

    #[test]
    fn dropping_the_strategy_detaches_listeners() {
        let store = Arc::new(MemoryStore::new());
        let strategy = live(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        assert_eq!(store.listener_count(), 4);
        let collection = strategy.core.collection.clone();

        drop(strategy);
        assert_eq!(store.listener_count(), 0);
        store.remote_set("todos/late", json!({"t": 1})).unwrap();
        assert!(collection.is_empty());
    }
}
