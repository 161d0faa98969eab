//! Local records with attribute storage, dirty tracking and events.

use super::events::{EventEmitter, HandlerId};
use crate::attributes::{identifier_string, Attributes};
use crate::error::SyncError;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CID: AtomicU64 = AtomicU64::new(1);

/// Whether a record is currently absorbing a remote change.
///
/// While a record is [`SyncGuard::RemoteApplying`], the sync layer ignores
/// its local change events so that applying a remote update never pushes
/// it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncGuard {
    /// Local changes are pushed as usual.
    Idle,
    /// A remote change is being applied.
    RemoteApplying,
}

/// What happened to a model.
#[derive(Debug, Clone)]
pub enum ModelEventKind {
    /// Attributes changed; lists the keys that changed.
    Change {
        /// Changed keys.
        changed: Vec<String>,
    },
    /// The model was destroyed.
    Destroy,
    /// The model was brought in line with the remote store.
    Sync,
    /// A remote operation failed.
    Error {
        /// Name of the failing operation or listener.
        operation: String,
        /// The failure.
        error: SyncError,
    },
}

/// An event emitted by a [`Model`].
#[derive(Debug, Clone)]
pub struct ModelEvent {
    /// The model the event concerns.
    pub model: Model,
    /// What happened.
    pub kind: ModelEventKind,
}

impl ModelEvent {
    /// The conventional event name.
    pub fn name(&self) -> &'static str {
        match self.kind {
            ModelEventKind::Change { .. } => "change",
            ModelEventKind::Destroy => "destroy",
            ModelEventKind::Sync => "sync",
            ModelEventKind::Error { .. } => "core:error",
        }
    }
}

#[derive(Default)]
struct ModelState {
    attributes: Attributes,
    changed: Attributes,
    previous: Attributes,
    remote_shadow: Option<Attributes>,
    remote_depth: u32,
}

struct ModelInner {
    cid: String,
    id_attribute: String,
    state: Mutex<ModelState>,
    events: EventEmitter<ModelEvent>,
}

/// A record: a map of attributes, one of which is the identifier.
///
/// `Model` is a cheap handle; clones share state. Mutators come in pairs:
/// [`set`](Model::set) emits a change event, [`set_silent`](Model::set_silent)
/// does not.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    /// Creates a model whose identifier attribute is `"id"`.
    pub fn new(attributes: Attributes) -> Self {
        Self::with_id_attribute(attributes, crate::config::DEFAULT_ID_ATTRIBUTE)
    }

    /// Creates a model with a custom identifier attribute.
    pub fn with_id_attribute(attributes: Attributes, id_attribute: impl Into<String>) -> Self {
        let cid = format!("c{}", NEXT_CID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(ModelInner {
                cid,
                id_attribute: id_attribute.into(),
                state: Mutex::new(ModelState {
                    attributes,
                    ..ModelState::default()
                }),
                events: EventEmitter::new(),
            }),
        }
    }

    /// Process-unique client id.
    pub fn cid(&self) -> &str {
        &self.inner.cid
    }

    /// Name of the identifier attribute.
    pub fn id_attribute(&self) -> &str {
        &self.inner.id_attribute
    }

    /// The identifier, if set to a string or number.
    pub fn id(&self) -> Option<String> {
        self.get(&self.inner.id_attribute)
            .as_ref()
            .and_then(identifier_string)
    }

    /// Returns true until the model has an identifier.
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// The value of one attribute.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().attributes.get(key).cloned()
    }

    /// Returns true if the attribute is present.
    pub fn has(&self, key: &str) -> bool {
        self.inner.state.lock().attributes.contains_key(key)
    }

    /// A copy of all attributes.
    pub fn attributes(&self) -> Attributes {
        self.inner.state.lock().attributes.clone()
    }

    /// The attributes as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.attributes())
    }

    /// Sets attributes and emits `change` if any value differed.
    ///
    /// Returns the keys that changed.
    pub fn set(&self, attributes: Attributes) -> Vec<String> {
        let changed = self.apply(attributes);
        self.emit_change(&changed);
        changed
    }

    /// Sets attributes without emitting.
    pub fn set_silent(&self, attributes: Attributes) -> Vec<String> {
        self.apply(attributes)
    }

    /// Sets one attribute and emits `change` if it differed.
    pub fn set_attr(&self, key: impl Into<String>, value: Value) -> bool {
        let mut attributes = Attributes::new();
        attributes.insert(key.into(), value);
        !self.set(attributes).is_empty()
    }

    /// Removes an attribute and emits `change` if it was present.
    pub fn unset(&self, key: &str) -> bool {
        let removed = self.remove(key);
        if removed {
            self.emit_change(&[key.to_string()]);
        }
        removed
    }

    /// Removes an attribute without emitting.
    pub fn unset_silent(&self, key: &str) -> bool {
        self.remove(key)
    }

    /// Attributes changed by the last mutation; removed keys map to null.
    pub fn changed_attributes(&self) -> Attributes {
        self.inner.state.lock().changed.clone()
    }

    /// Returns true if the last mutation changed `key`.
    pub fn has_changed(&self, key: &str) -> bool {
        self.inner.state.lock().changed.contains_key(key)
    }

    /// The value `key` had before the last mutation.
    pub fn previous(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().previous.get(key).cloned()
    }

    /// Emits `destroy`. Listeners decide what destruction means remotely.
    pub fn destroy(&self) {
        self.trigger(ModelEventKind::Destroy);
    }

    /// Registers an event handler.
    pub fn on(&self, handler: impl Fn(&ModelEvent) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.on(handler)
    }

    /// Removes an event handler.
    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    /// Emits an event.
    pub fn trigger(&self, kind: ModelEventKind) {
        let event = ModelEvent {
            model: self.clone(),
            kind,
        };
        self.inner.events.emit(&event);
    }

    /// Returns true if both handles share one model.
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The current guard state.
    pub fn sync_guard(&self) -> SyncGuard {
        if self.inner.state.lock().remote_depth > 0 {
            SyncGuard::RemoteApplying
        } else {
            SyncGuard::Idle
        }
    }

    /// Enters [`SyncGuard::RemoteApplying`] until the returned guard drops.
    pub fn begin_remote_apply(&self) -> RemoteApplyGuard {
        self.inner.state.lock().remote_depth += 1;
        RemoteApplyGuard {
            model: self.clone(),
        }
    }

    /// The last record received from the remote store.
    pub(crate) fn remote_shadow(&self) -> Option<Attributes> {
        self.inner.state.lock().remote_shadow.clone()
    }

    pub(crate) fn set_remote_shadow(&self, shadow: Attributes) {
        self.inner.state.lock().remote_shadow = Some(shadow);
    }

    fn apply(&self, attributes: Attributes) -> Vec<String> {
        let mut state = self.inner.state.lock();
        state.previous = state.attributes.clone();
        state.changed.clear();
        let mut keys = Vec::new();
        for (key, value) in attributes {
            if state.attributes.get(&key) != Some(&value) {
                state.changed.insert(key.clone(), value.clone());
                state.attributes.insert(key.clone(), value);
                keys.push(key);
            }
        }
        keys
    }

    fn remove(&self, key: &str) -> bool {
        let mut state = self.inner.state.lock();
        if !state.attributes.contains_key(key) {
            return false;
        }
        state.previous = state.attributes.clone();
        state.changed.clear();
        state.attributes.remove(key);
        state.changed.insert(key.to_string(), Value::Null);
        true
    }

    fn emit_change(&self, changed: &[String]) {
        if !changed.is_empty() {
            self.trigger(ModelEventKind::Change {
                changed: changed.to_vec(),
            });
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("cid", &self.inner.cid)
            .field("attributes", &self.inner.state.lock().attributes)
            .finish()
    }
}

/// Keeps a model in [`SyncGuard::RemoteApplying`] while alive.
#[must_use = "the guard is released as soon as it is dropped"]
pub struct RemoteApplyGuard {
    model: Model,
}

impl Drop for RemoteApplyGuard {
    fn drop(&mut self) {
        let mut state = self.model.inner.state.lock();
        state.remote_depth = state.remote_depth.saturating_sub(1);
    }
}
