//! Ordered groups of models.

use super::events::{EventEmitter, HandlerId};
use super::model::{Model, ModelEvent, ModelEventKind};
use crate::attributes::{identifier_string, Attributes};
use crate::error::SyncError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

/// An event emitted by a [`Collection`].
///
/// Member `change` and `destroy` events are re-emitted as
/// [`CollectionEvent::Change`] and [`CollectionEvent::Destroy`].
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// A model was added.
    Add {
        /// The new member.
        model: Model,
    },
    /// A model was removed.
    Remove {
        /// The former member.
        model: Model,
    },
    /// The whole membership was replaced.
    Reset,
    /// The collection was brought in line with the remote store.
    Sync,
    /// A member's attributes changed.
    Change {
        /// The member.
        model: Model,
        /// Changed keys.
        changed: Vec<String>,
    },
    /// A member was destroyed.
    Destroy {
        /// The member.
        model: Model,
    },
    /// A remote operation failed.
    Error {
        /// Name of the failing operation or listener.
        operation: String,
        /// The failure.
        error: SyncError,
    },
}

impl CollectionEvent {
    /// The conventional event name.
    pub fn name(&self) -> &'static str {
        match self {
            CollectionEvent::Add { .. } => "add",
            CollectionEvent::Remove { .. } => "remove",
            CollectionEvent::Reset => "reset",
            CollectionEvent::Sync => "sync",
            CollectionEvent::Change { .. } => "change",
            CollectionEvent::Destroy { .. } => "destroy",
            CollectionEvent::Error { .. } => "core:error",
        }
    }
}

#[derive(Default)]
struct CollectionState {
    models: Vec<Model>,
    /// Bubbling handler per member, keyed by cid.
    bindings: HashMap<String, HandlerId>,
}

struct CollectionInner {
    id_attribute: String,
    state: Mutex<CollectionState>,
    events: EventEmitter<CollectionEvent>,
}

/// An ordered set of models sharing an identifier attribute.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    /// Creates an empty collection of models identified by `"id"`.
    pub fn new() -> Self {
        Self::with_id_attribute(crate::config::DEFAULT_ID_ATTRIBUTE)
    }

    /// Creates an empty collection with a custom identifier attribute.
    pub fn with_id_attribute(id_attribute: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                id_attribute: id_attribute.into(),
                state: Mutex::new(CollectionState::default()),
                events: EventEmitter::new(),
            }),
        }
    }

    /// Name of the members' identifier attribute.
    pub fn id_attribute(&self) -> &str {
        &self.inner.id_attribute
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.inner.state.lock().models.len()
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The members, in order.
    pub fn models(&self) -> Vec<Model> {
        self.inner.state.lock().models.clone()
    }

    /// The member with identifier `id`.
    pub fn get(&self, id: &str) -> Option<Model> {
        self.inner
            .state
            .lock()
            .models
            .iter()
            .find(|m| m.id().as_deref() == Some(id))
            .cloned()
    }

    /// The member at `index`.
    pub fn at(&self, index: usize) -> Option<Model> {
        self.inner.state.lock().models.get(index).cloned()
    }

    /// Identifiers of all members that have one, in order.
    pub fn ids(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .models
            .iter()
            .filter_map(Model::id)
            .collect()
    }

    /// Builds a detached model configured for this collection.
    pub fn prepare(&self, attributes: Attributes) -> Model {
        Model::with_id_attribute(attributes, self.inner.id_attribute.clone())
    }

    /// Adds records and emits `add` for each new member.
    ///
    /// A record whose identifier is already present is not merged; the
    /// existing member is returned in its place.
    pub fn add(&self, records: Vec<Attributes>) -> Vec<Model> {
        self.add_records(records, true)
    }

    /// Adds records without emitting.
    pub fn add_silent(&self, records: Vec<Attributes>) -> Vec<Model> {
        self.add_records(records, false)
    }

    /// Removes the members with the given identifiers and emits `remove`
    /// for each. Returns the removed models.
    pub fn remove(&self, ids: &[String]) -> Vec<Model> {
        self.remove_ids(ids, true)
    }

    /// Removes members without emitting.
    pub fn remove_silent(&self, ids: &[String]) -> Vec<Model> {
        self.remove_ids(ids, false)
    }

    /// Replaces every member and emits one `reset`.
    pub fn reset(&self, records: Vec<Attributes>) -> Vec<Model> {
        let models = self.replace(records);
        self.trigger(CollectionEvent::Reset);
        models
    }

    /// Replaces every member without emitting.
    pub fn reset_silent(&self, records: Vec<Attributes>) -> Vec<Model> {
        self.replace(records)
    }

    /// Merges `records` into the membership.
    ///
    /// Records matching a member by identifier update it (emitting
    /// `change`), new records are added (emitting `add`) and members absent
    /// from `records` are removed (emitting `remove`).
    pub fn set(&self, records: Vec<Attributes>) -> Vec<Model> {
        let mut result = Vec::with_capacity(records.len());
        let mut keep: HashSet<String> = HashSet::new();
        for record in records {
            let existing = self
                .record_id(&record)
                .and_then(|id| self.get(&id));
            let model = match existing {
                Some(model) => {
                    model.set(record);
                    model
                }
                None => match self.add(vec![record]).pop() {
                    Some(model) => model,
                    None => continue,
                },
            };
            keep.insert(model.cid().to_string());
            result.push(model);
        }

        let stale: Vec<Model> = self
            .models()
            .into_iter()
            .filter(|m| !keep.contains(m.cid()))
            .collect();
        for model in stale {
            self.detach(&model, true);
        }
        result
    }

    /// Registers an event handler.
    pub fn on(&self, handler: impl Fn(&CollectionEvent) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.on(handler)
    }

    /// Removes an event handler.
    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    /// Emits an event.
    pub fn trigger(&self, event: CollectionEvent) {
        self.inner.events.emit(&event);
    }

    fn record_id(&self, record: &Attributes) -> Option<String> {
        record
            .get(&self.inner.id_attribute)
            .and_then(identifier_string)
    }

    fn add_records(&self, records: Vec<Attributes>, notify: bool) -> Vec<Model> {
        let mut result = Vec::with_capacity(records.len());
        for record in records {
            if let Some(existing) = self.record_id(&record).and_then(|id| self.get(&id)) {
                result.push(existing);
                continue;
            }
            let model = self.prepare(record);
            self.attach(&model);
            if notify {
                self.trigger(CollectionEvent::Add {
                    model: model.clone(),
                });
            }
            result.push(model);
        }
        result
    }

    fn remove_ids(&self, ids: &[String], notify: bool) -> Vec<Model> {
        let targets: Vec<Model> = ids.iter().filter_map(|id| self.get(id)).collect();
        targets
            .into_iter()
            .filter(|model| self.detach(model, notify))
            .collect()
    }

    fn replace(&self, records: Vec<Attributes>) -> Vec<Model> {
        for model in self.models() {
            self.detach(&model, false);
        }
        self.add_silent(records)
    }

    /// Inserts a model and starts bubbling its events.
    fn attach(&self, model: &Model) {
        let weak: Weak<CollectionInner> = Arc::downgrade(&self.inner);
        let handler = model.on(move |event: &ModelEvent| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let bubbled = match &event.kind {
                ModelEventKind::Change { changed } => CollectionEvent::Change {
                    model: event.model.clone(),
                    changed: changed.clone(),
                },
                ModelEventKind::Destroy => CollectionEvent::Destroy {
                    model: event.model.clone(),
                },
                _ => return,
            };
            inner.events.emit(&bubbled);
        });
        let mut state = self.inner.state.lock();
        state.models.push(model.clone());
        state.bindings.insert(model.cid().to_string(), handler);
    }

    /// Removes a model, stops bubbling and optionally emits `remove`.
    fn detach(&self, model: &Model, notify: bool) -> bool {
        let handler = {
            let mut state = self.inner.state.lock();
            let Some(index) = state.models.iter().position(|m| m.ptr_eq(model)) else {
                return false;
            };
            state.models.remove(index);
            state.bindings.remove(model.cid())
        };
        if let Some(handler) = handler {
            model.off(handler);
        }
        if notify {
            self.trigger(CollectionEvent::Remove {
                model: model.clone(),
            });
        }
        true
    }
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("id_attribute", &self.inner.id_attribute)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn recorded(collection: &Collection) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        collection.on(move |event| sink.lock().push(event.name().to_string()));
        seen
    }

    #[test]
    fn add_and_lookup() {
        let collection = Collection::new();
        let seen = recorded(&collection);
        collection.add(vec![attrs(json!({"id": "a"})), attrs(json!({"id": "b"}))]);
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.ids(), vec!["a", "b"]);
        assert_eq!(collection.at(1).and_then(|m| m.id()).as_deref(), Some("b"));
        assert!(collection.get("c").is_none());
        assert_eq!(*seen.lock(), vec!["add", "add"]);
    }

    #[test]
    fn duplicate_ids_are_not_merged() {
        let collection = Collection::new();
        let first = collection.add(vec![attrs(json!({"id": "a", "n": 1}))]);
        let second = collection.add(vec![attrs(json!({"id": "a", "n": 2}))]);
        assert!(first[0].ptr_eq(&second[0]));
        assert_eq!(collection.len(), 1);
        assert_eq!(second[0].get("n"), Some(json!(1)));
    }

    #[test]
    fn silent_variants_do_not_emit() {
        let collection = Collection::new();
        let seen = recorded(&collection);
        collection.add_silent(vec![attrs(json!({"id": "a"}))]);
        collection.remove_silent(&["a".to_string()]);
        collection.reset_silent(vec![attrs(json!({"id": "b"}))]);
        assert!(seen.lock().is_empty());
        assert_eq!(collection.ids(), vec!["b"]);
    }

    #[test]
    fn member_events_bubble_until_removed() {
        let collection = Collection::new();
        let seen = recorded(&collection);
        let model = collection.add_silent(vec![attrs(json!({"id": "a"}))]).remove(0);
        model.set_attr("n", json!(1));
        model.destroy();
        assert_eq!(*seen.lock(), vec!["change", "destroy"]);

        collection.remove(&["a".to_string()]);
        model.set_attr("n", json!(2));
        assert_eq!(*seen.lock(), vec!["change", "destroy", "remove"]);
    }

    #[test]
    fn set_merges_adds_and_removes() {
        let collection = Collection::new();
        collection.add_silent(vec![
            attrs(json!({"id": "a", "n": 1})),
            attrs(json!({"id": "b", "n": 1})),
        ]);
        let seen = recorded(&collection);
        collection.set(vec![
            attrs(json!({"id": "a", "n": 2})),
            attrs(json!({"id": "c", "n": 1})),
        ]);
        assert_eq!(collection.ids(), vec!["a", "c"]);
        assert_eq!(collection.get("a").and_then(|m| m.get("n")), Some(json!(2)));
        assert_eq!(*seen.lock(), vec!["change", "add", "remove"]);
    }

    #[test]
    fn reset_emits_once() {
        let collection = Collection::new();
        collection.add(vec![attrs(json!({"id": "a"}))]);
        let seen = recorded(&collection);
        collection.reset(vec![attrs(json!({"id": "x"})), attrs(json!({"id": "y"}))]);
        assert_eq!(*seen.lock(), vec!["reset"]);
        assert_eq!(collection.ids(), vec!["x", "y"]);
    }

    #[test]
    fn custom_id_attribute() {
        let collection = Collection::with_id_attribute("_id");
        let model = collection.prepare(attrs(json!({"_id": "k"})));
        assert_eq!(model.id_attribute(), "_id");
        collection.add(vec![attrs(json!({"_id": 3}))]);
        assert!(collection.get("3").is_some());
    }
}
