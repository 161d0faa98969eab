//! One-shot collection strategy.

use super::dispatch::{Method, SyncOptions};
use super::strategy::{
    normalize_children, CollectionCore, CollectionSyncStrategy, CollectionTarget, FetchOptions,
    MemberTarget, Notify, SyncMode,
};
use crate::attributes::Attributes;
use crate::error::{SyncError, SyncResult};
use crate::local::{CollectionEvent, HandlerId, Model, ModelEventKind};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use treesync_store::Reference;

/// Mirrors the last fetched state of a remote node.
///
/// Nothing is listened to remotely. `fetch` reads the node once, `create`
/// and `save` write through the funnel, and destroying a member deletes it
/// remotely and drops it from the collection. `add`, `remove` and `reset`
/// only touch local state.
#[derive(Debug)]
pub struct SnapshotStrategy {
    core: Arc<CollectionCore>,
    handler: Mutex<Option<HandlerId>>,
}

impl SnapshotStrategy {
    pub(crate) fn new(core: Arc<CollectionCore>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let handler = core.collection.on(move |event| {
                if let CollectionEvent::Destroy { model } = event {
                    if let Some(strategy) = weak.upgrade() {
                        strategy.on_member_destroy(model);
                    }
                }
            });
            Self {
                core,
                handler: Mutex::new(Some(handler)),
            }
        })
    }

    fn on_member_destroy(&self, model: &Model) {
        let Some(id) = model.id() else {
            return;
        };
        let collection = self.core.collection.clone();
        let options = SyncOptions::new().or_else(move |err| {
            collection.trigger(CollectionEvent::Error {
                operation: "destroy".to_string(),
                error: err.clone(),
            });
        });
        let target = MemberTarget {
            core: &self.core,
            model,
        };
        if let Err(err) = self.sync(Method::Delete, &target, options) {
            warn!(id = %id, error = %err, "could not delete member");
            self.core.collection.trigger(CollectionEvent::Error {
                operation: "destroy".to_string(),
                error: err,
            });
        }
        self.core.collection.remove(&[id]);
    }
}

impl CollectionSyncStrategy for SnapshotStrategy {
    fn mode(&self) -> SyncMode {
        SyncMode::Snapshot
    }

    fn reference(&self, refresh: bool) -> SyncResult<Reference> {
        self.core.reference(refresh)
    }

    fn fetch(&self, options: FetchOptions) -> SyncResult<()> {
        let FetchOptions { reset, options } = options;
        let on_error = options.clone();
        let core = Arc::clone(&self.core);
        let failed = Arc::clone(&self.core);
        let wrapped = SyncOptions::new()
            .on_success(move |value| {
                match normalize_children(value.clone(), core.id_attribute()) {
                    Ok(records) => {
                        debug!(count = records.len(), reset, "applying fetched members");
                        if reset {
                            core.collection.reset(records);
                        } else {
                            core.collection.set(records);
                        }
                        options.succeed(value);
                        core.collection.trigger(CollectionEvent::Sync);
                    }
                    Err(err) => {
                        core.collection.trigger(CollectionEvent::Error {
                            operation: Method::Read.as_str().to_string(),
                            error: err.clone(),
                        });
                        options.fail(err, value);
                    }
                }
            })
            .on_error(move |err: SyncError, value| {
                failed.collection.trigger(CollectionEvent::Error {
                    operation: Method::Read.as_str().to_string(),
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
        let records: Vec<Attributes> = self
            .core
            .prepare_records(records)?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        if notify.is_silent() {
            self.core.collection.add_silent(records.clone());
        } else {
            self.core.collection.add(records.clone());
        }
        options.succeed(Value::Array(
            records.iter().cloned().map(Value::Object).collect(),
        ));
        Ok(records)
    }

    fn create(&self, record: Attributes, options: SyncOptions) -> SyncResult<Attributes> {
        let (_, record) = self
            .core
            .prepare_records(vec![record])?
            .pop()
            .ok_or(SyncError::MissingIdentifier)?;
        let model = self
            .core
            .collection
            .add(vec![record.clone()])
            .pop()
            .ok_or(SyncError::MissingIdentifier)?;
        let synced = model.clone();
        let options = options.then(move |_| synced.trigger(ModelEventKind::Sync));
        let target = MemberTarget {
            core: &self.core,
            model: &model,
        };
        self.sync(Method::Create, &target, options)?;
        Ok(record)
    }

    fn remove(&self, ids: &[String], notify: Notify, options: SyncOptions) -> SyncResult<()> {
        if notify.is_silent() {
            self.core.collection.remove_silent(ids);
        } else {
            self.core.collection.remove(ids);
        }
        options.succeed(Value::Null);
        Ok(())
    }

    fn reset(&self, records: Vec<Attributes>, notify: Notify) -> SyncResult<Vec<Attributes>> {
        let records: Vec<Attributes> = self
            .core
            .prepare_records(records)?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        if notify.is_silent() {
            self.core.collection.reset_silent(records.clone());
        } else {
            self.core.collection.reset(records.clone());
        }
        Ok(records)
    }

    fn save(&self, model: &Model, options: SyncOptions) -> SyncResult<()> {
        let synced = model.clone();
        let options = options.then(move |_| synced.trigger(ModelEventKind::Sync));
        let target = MemberTarget {
            core: &self.core,
            model,
        };
        self.sync(Method::Update, &target, options)
    }

    fn close(&self) {
        let handler = self.handler.lock().take();
        if let Some(handler) = handler {
            self.core.collection.off(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::Collection;
    use crate::sync::resolver::{Location, ReferenceResolver};
    use serde_json::json;
    use treesync_store::{Database, MemoryStore};

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn strategy(store: &Arc<MemoryStore>) -> Arc<SnapshotStrategy> {
        let core = CollectionCore::new(
            Collection::new(),
            Location::from("todos"),
            ReferenceResolver::new(Database::new(store.clone())),
        );
        SnapshotStrategy::new(Arc::new(core))
    }

    fn names(strategy: &SnapshotStrategy) -> Arc<parking_lot::Mutex<Vec<String>>> {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        strategy
            .core
            .collection
            .on(move |event| sink.lock().push(event.name().to_string()));
        seen
    }

    #[test]
    fn fetch_resets_or_merges_then_syncs() {
        let store = Arc::new(MemoryStore::new());
        store
            .remote_set("todos", json!({"a": {"t": 1}, "b": {"t": 2}}))
            .unwrap();
        let strategy = strategy(&store);
        strategy
            .add(vec![attrs(json!({"id": "a", "t": 0}))], Notify::Silent, SyncOptions::new())
            .unwrap();
        let seen = names(&strategy);

        strategy.fetch(FetchOptions::new()).unwrap();
        assert_eq!(strategy.core.collection.ids(), vec!["a", "b"]);
        assert_eq!(
            strategy.core.collection.get("a").unwrap().get("t"),
            Some(json!(1))
        );
        assert_eq!(*seen.lock(), vec!["change", "add", "sync"]);

        seen.lock().clear();
        strategy.fetch(FetchOptions::new().with_reset(true)).unwrap();
        assert_eq!(strategy.core.collection.len(), 2);
        assert_eq!(*seen.lock(), vec!["reset", "sync"]);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn fetch_reports_primitive_children() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos", json!({"a": 5})).unwrap();
        let strategy = strategy(&store);
        let failures = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let seen = names(&strategy);
        strategy
            .fetch(FetchOptions::new().with_options(
                SyncOptions::new().on_error(move |err, _| sink.lock().push(err)),
            ))
            .unwrap();
        assert_eq!(
            *failures.lock(),
            vec![SyncError::InvalidIdentifier { key: "a".into() }]
        );
        assert_eq!(*seen.lock(), vec!["core:error"]);
        assert!(strategy.core.collection.is_empty());
    }

    #[test]
    fn add_is_local_only() {
        let store = Arc::new(MemoryStore::new());
        let strategy = strategy(&store);
        let records = strategy
            .add(vec![attrs(json!({"t": 1}))], Notify::Emit, SyncOptions::new())
            .unwrap();
        let id = records[0]["id"].as_str().unwrap().to_string();
        assert!(strategy.core.collection.get(&id).is_some());
        assert!(store.writes().is_empty());
    }

    #[test]
    fn create_writes_through_the_funnel() {
        let store = Arc::new(MemoryStore::new());
        let strategy = strategy(&store);
        let record = strategy
            .create(attrs(json!({"name": "a"})), SyncOptions::new())
            .unwrap();
        let id = record["id"].as_str().unwrap();
        assert_eq!(store.value(&format!("todos/{id}")), json!({"name": "a"}));
        assert_eq!(strategy.core.collection.len(), 1);
    }

    #[test]
    fn member_destroy_deletes_and_removes() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/a", json!({"t": 1})).unwrap();
        let strategy = strategy(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let seen = names(&strategy);

        strategy.core.collection.get("a").unwrap().destroy();
        assert_eq!(store.value("todos"), Value::Null);
        assert!(strategy.core.collection.is_empty());
        // the strategy handler runs first and removes before the spy sees `destroy`
        assert_eq!(*seen.lock(), vec!["remove", "destroy"]);
    }

    #[test]
    fn save_updates_one_member() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/a", json!({"t": 1, "u": 1})).unwrap();
        let strategy = strategy(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        let model = strategy.core.collection.get("a").unwrap();
        model.set(attrs(json!({"t": 2})));
        assert_eq!(store.value("todos/a"), json!({"t": 1, "u": 1}));

        strategy.save(&model, SyncOptions::new()).unwrap();
        assert_eq!(store.value("todos/a"), json!({"t": 2, "u": 1}));
    }

    #[test]
    fn close_stops_member_deletes() {
        let store = Arc::new(MemoryStore::new());
        store.remote_set("todos/a", json!({"t": 1})).unwrap();
        let strategy = strategy(&store);
        strategy.fetch(FetchOptions::new()).unwrap();
        strategy.close();
        strategy.core.collection.get("a").unwrap().destroy();
        assert_eq!(store.value("todos/a"), json!({"t": 1}));
    }
}
