//! In-memory realtime store for tests and demos.

use crate::backend::{Completion, Listener, ListenerId, ReadCallback, RemoteStore};
use crate::error::{StoreError, StoreResult};
use crate::path::Path;
use crate::push_id::PushIdGenerator;
use crate::snapshot::{EventType, Snapshot};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Key under which a priority travels inside a written object.
const PRIORITY_KEY: &str = ".priority";

/// The kind of a logged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Full overwrite.
    Set,
    /// Full overwrite with a priority.
    SetWithPriority,
    /// Partial merge.
    Update,
}

/// A write accepted by the store, as issued by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Target path.
    pub path: Path,
    /// Kind of write.
    pub kind: WriteKind,
    /// Payload as issued (the merge map for updates).
    pub value: Value,
    /// Priority, for prioritized writes.
    pub priority: Option<Value>,
}

type Task = Box<dyn FnOnce() + Send>;

struct Registration {
    id: ListenerId,
    path: Path,
    event: EventType,
    listener: Listener,
    active: Arc<AtomicBool>,
}

/// One listener invocation waiting to run.
struct Delivery {
    listener: Listener,
    active: Arc<AtomicBool>,
    result: StoreResult<Snapshot>,
}

impl Delivery {
    fn run(self) {
        // cancellation errors are delivered even though the listener is gone
        if self.active.load(Ordering::SeqCst) || self.result.is_err() {
            (self.listener)(self.result);
        }
    }
}

/// The observable state of one node, captured around a write.
#[derive(Debug, Clone, PartialEq)]
struct NodeView {
    value: Value,
    priority: Option<Value>,
    children: BTreeMap<String, (Value, Option<Value>)>,
}

#[derive(Default)]
struct MemoryState {
    root: Value,
    priorities: BTreeMap<Path, Value>,
    registrations: Vec<Registration>,
    denied: Vec<Path>,
    disconnected: bool,
    writes: Vec<WriteRecord>,
}

impl MemoryState {
    fn view(&self, path: &Path) -> NodeView {
        let value = get_at(&self.root, path);
        let children = match &value {
            Value::Object(map) => map
                .iter()
                .map(|(key, child)| {
                    let priority = self.priorities.get(&path.push_unchecked(key.clone()));
                    (key.clone(), (child.clone(), priority.cloned()))
                })
                .collect(),
            _ => BTreeMap::new(),
        };
        NodeView {
            priority: self.priorities.get(path).cloned(),
            value,
            children,
        }
    }

    fn snapshot(&self, path: &Path) -> Snapshot {
        Snapshot::new(path.key().map(str::to_string), get_at(&self.root, path))
            .with_priority(self.priorities.get(path).cloned())
    }

    fn is_denied(&self, path: &Path) -> bool {
        self.denied.iter().any(|denied| denied.is_related(path))
    }

    fn check_access(&self, path: &Path) -> StoreResult<()> {
        if self.disconnected {
            Err(StoreError::Disconnected)
        } else if self.is_denied(path) {
            Err(StoreError::PermissionDenied {
                path: path.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Paths with at least one listener whose view a write at `path` can change.
    fn watched_paths(&self, path: &Path) -> Vec<Path> {
        let mut watched: Vec<Path> = Vec::new();
        for registration in &self.registrations {
            if registration.path.is_related(path) && !watched.contains(&registration.path) {
                watched.push(registration.path.clone());
            }
        }
        watched
    }

    fn write_node(&mut self, path: &Path, mut value: Value, priority: Option<Value>) {
        let mut extracted = Vec::new();
        extract_priorities(path, &mut value, &mut extracted);
        let value = prune(value);

        self.priorities.retain(|p, _| !path.contains(p));
        set_at(&mut self.root, path.segments(), value);
        for (p, prio) in extracted {
            self.priorities.insert(p, prio);
        }
        if let Some(prio) = priority {
            self.priorities.insert(path.clone(), prio);
        }
    }

    fn drop_orphaned_priorities(&mut self) {
        let root = &self.root;
        self.priorities.retain(|p, _| !get_at(root, p).is_null());
    }

    /// Computes every event caused by moving from `before` to the current state.
    fn diff_events(&self, before: &HashMap<Path, NodeView>) -> Vec<Delivery> {
        let after: HashMap<&Path, NodeView> =
            before.keys().map(|p| (p, self.view(p))).collect();
        let mut deliveries = Vec::new();

        let order = [
            EventType::ChildRemoved,
            EventType::ChildAdded,
            EventType::ChildMoved,
            EventType::ChildChanged,
            EventType::Value,
        ];
        for event in order {
            for registration in self.registrations.iter().filter(|r| r.event == event) {
                let (Some(old), Some(new)) =
                    (before.get(&registration.path), after.get(&registration.path))
                else {
                    continue;
                };
                for snapshot in node_events(event, &registration.path, old, new) {
                    deliveries.push(Delivery {
                        listener: Arc::clone(&registration.listener),
                        active: Arc::clone(&registration.active),
                        result: Ok(snapshot),
                    });
                }
            }
        }
        deliveries
    }
}

fn node_events(event: EventType, path: &Path, old: &NodeView, new: &NodeView) -> Vec<Snapshot> {
    let child = |key: &String, (value, priority): &(Value, Option<Value>)| {
        Snapshot::new(Some(key.clone()), value.clone()).with_priority(priority.clone())
    };
    match event {
        EventType::Value => {
            if old.value != new.value || old.priority != new.priority {
                vec![Snapshot::new(path.key().map(str::to_string), new.value.clone())
                    .with_priority(new.priority.clone())]
            } else {
                Vec::new()
            }
        }
        EventType::ChildRemoved => old
            .children
            .iter()
            .filter(|(key, _)| !new.children.contains_key(*key))
            .map(|(key, entry)| child(key, entry))
            .collect(),
        EventType::ChildAdded => new
            .children
            .iter()
            .filter(|(key, _)| !old.children.contains_key(*key))
            .map(|(key, entry)| child(key, entry))
            .collect(),
        EventType::ChildMoved => new
            .children
            .iter()
            .filter(|(key, (_, priority))| {
                old.children
                    .get(*key)
                    .is_some_and(|(_, old_priority)| old_priority != priority)
            })
            .map(|(key, entry)| child(key, entry))
            .collect(),
        EventType::ChildChanged => new
            .children
            .iter()
            .filter(|(key, entry)| old.children.get(*key).is_some_and(|old| old != *entry))
            .map(|(key, entry)| child(key, entry))
            .collect(),
    }
}

/// An in-process realtime store.
///
/// `MemoryStore` keeps the whole tree in memory and raises the same
/// notifications a realtime client would: value and per-child events for
/// every listener whose node a write touches, with local write events
/// raised before the write's completion.
///
/// By default callbacks run before the call that caused them returns. A
/// store built with [`MemoryStore::deferred`] queues them instead until
/// [`MemoryStore::flush`] is called, which lets tests interleave
/// deliveries.
///
/// Access rules can be simulated with [`MemoryStore::deny`] and a lost
/// connection with [`MemoryStore::set_connected`].
pub struct MemoryStore {
    host: String,
    deferred: bool,
    state: Mutex<MemoryState>,
    queue: Mutex<VecDeque<Task>>,
    push_ids: PushIdGenerator,
    next_listener: AtomicU64,
}

impl MemoryStore {
    /// Default host of an in-memory store.
    pub const DEFAULT_HOST: &'static str = "memory.treesync.io";

    /// Creates an empty store that delivers callbacks immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::build(Self::DEFAULT_HOST.to_string(), false)
    }

    /// Creates an empty store that queues callbacks until [`flush`](Self::flush).
    #[must_use]
    pub fn deferred() -> Self {
        Self::build(Self::DEFAULT_HOST.to_string(), true)
    }

    /// Creates an empty store served from `host`.
    #[must_use]
    pub fn with_host(host: impl Into<String>) -> Self {
        Self::build(host.into(), false)
    }

    fn build(host: String, deferred: bool) -> Self {
        Self {
            host,
            deferred,
            state: Mutex::new(MemoryState::default()),
            queue: Mutex::new(VecDeque::new()),
            push_ids: PushIdGenerator::new(),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Returns true if callbacks are queued rather than run immediately.
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Runs queued callbacks, including any they enqueue, until none remain.
    ///
    /// Returns the number of callbacks run.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Number of queued callbacks.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Rejects every read, write and listen touching `path`.
    ///
    /// Listeners already attached at or above `path` are cancelled with
    /// [`StoreError::PermissionDenied`].
    pub fn deny(&self, path: &str) -> StoreResult<()> {
        let path = Path::parse(path)?;
        let deliveries = {
            let mut state = self.state.lock();
            let mut cancelled = Vec::new();
            state.registrations.retain(|registration| {
                if registration.path.is_related(&path) {
                    registration.active.store(false, Ordering::SeqCst);
                    cancelled.push(Delivery {
                        listener: Arc::clone(&registration.listener),
                        active: Arc::clone(&registration.active),
                        result: Err(StoreError::PermissionDenied {
                            path: registration.path.to_string(),
                        }),
                    });
                    false
                } else {
                    true
                }
            });
            state.denied.push(path);
            cancelled
        };
        self.deliver(deliveries, None);
        Ok(())
    }

    /// Lifts every access rule.
    pub fn allow_all(&self) {
        self.state.lock().denied.clear();
    }

    /// Simulates losing or regaining the connection. While disconnected,
    /// reads and writes fail with [`StoreError::Disconnected`].
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().disconnected = !connected;
    }

    /// The current value at `path`.
    pub fn value_at(&self, path: &Path) -> Value {
        get_at(&self.state.lock().root, path)
    }

    /// The current value at a slash-separated path; `Value::Null` if the
    /// path is malformed or absent.
    pub fn value(&self, path: &str) -> Value {
        Path::parse(path)
            .map(|p| self.value_at(&p))
            .unwrap_or(Value::Null)
    }

    /// The priority at a slash-separated path.
    pub fn priority(&self, path: &str) -> Option<Value> {
        let path = Path::parse(path).ok()?;
        self.state.lock().priorities.get(&path).cloned()
    }

    /// Every write accepted so far, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Forgets the write log.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// Number of listeners attached exactly at `path`.
    pub fn listener_count_at(&self, path: &str) -> usize {
        let Ok(path) = Path::parse(path) else {
            return 0;
        };
        self.state
            .lock()
            .registrations
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    /// Overwrites `path` as another client would; listeners are notified.
    pub fn remote_set(&self, path: &str, value: Value) -> StoreResult<()> {
        let path = Path::parse(path)?;
        self.set(&path, value, None, None);
        Ok(())
    }

    /// Merges into `path` as another client would; listeners are notified.
    pub fn remote_update(&self, path: &str, values: Map<String, Value>) -> StoreResult<()> {
        let path = Path::parse(path)?;
        self.update(&path, values, None);
        Ok(())
    }

    /// Deletes `path` as another client would; listeners are notified.
    pub fn remote_remove(&self, path: &str) -> StoreResult<()> {
        self.remote_set(path, Value::Null)
    }

    fn deliver(&self, deliveries: Vec<Delivery>, completion: Option<Task>) {
        let tasks = deliveries
            .into_iter()
            .map(|delivery| Box::new(move || delivery.run()) as Task)
            .chain(completion);
        if self.deferred {
            self.queue.lock().extend(tasks);
        } else {
            for task in tasks {
                task();
            }
        }
    }

    fn complete(on_complete: Option<Completion>, result: StoreResult<()>) -> Option<Task> {
        on_complete.map(|callback| Box::new(move || callback(result)) as Task)
    }

    /// Applies a write and collects the resulting events.
    fn apply(
        &self,
        path: &Path,
        record: WriteRecord,
        mutate: impl FnOnce(&mut MemoryState),
    ) -> (Vec<Delivery>, StoreResult<()>) {
        let mut state = self.state.lock();
        if let Err(err) = state.check_access(path) {
            debug!(path = %path, error = %err, "write rejected");
            return (Vec::new(), Err(err));
        }
        state.writes.push(record);

        let before: HashMap<Path, NodeView> = state
            .watched_paths(path)
            .into_iter()
            .map(|p| {
                let view = state.view(&p);
                (p, view)
            })
            .collect();
        mutate(&mut *state);
        state.drop_orphaned_priorities();
        let deliveries = state.diff_events(&before);
        trace!(path = %path, events = deliveries.len(), "write applied");
        (deliveries, Ok(()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    fn host(&self) -> &str {
        &self.host
    }

    fn read(&self, path: &Path, callback: ReadCallback) {
        let result = {
            let state = self.state.lock();
            state.check_access(path).map(|()| state.snapshot(path))
        };
        self.deliver(Vec::new(), Some(Box::new(move || callback(result))));
    }

    fn set(
        &self,
        path: &Path,
        value: Value,
        priority: Option<Value>,
        on_complete: Option<Completion>,
    ) {
        let record = WriteRecord {
            path: path.clone(),
            kind: if priority.is_some() {
                WriteKind::SetWithPriority
            } else {
                WriteKind::Set
            },
            value: value.clone(),
            priority: priority.clone(),
        };
        let (deliveries, result) = self.apply(path, record, |state| {
            state.write_node(path, value, priority);
        });
        self.deliver(deliveries, Self::complete(on_complete, result));
    }

    fn update(&self, path: &Path, values: Map<String, Value>, on_complete: Option<Completion>) {
        let mut targets = Vec::with_capacity(values.len());
        let mut priority = None;
        for (key, value) in &values {
            if key == PRIORITY_KEY {
                priority = Some(value.clone());
                continue;
            }
            match path.child(key) {
                Ok(child) => targets.push((child, value.clone())),
                Err(err) => {
                    self.deliver(Vec::new(), Self::complete(on_complete, Err(err)));
                    return;
                }
            }
        }
        let record = WriteRecord {
            path: path.clone(),
            kind: WriteKind::Update,
            value: Value::Object(values),
            priority: None,
        };
        let (deliveries, result) = self.apply(path, record, |state| {
            for (child, value) in targets {
                state.write_node(&child, value, None);
            }
            match priority {
                Some(Value::Null) => {
                    state.priorities.remove(path);
                }
                Some(priority) => {
                    state.priorities.insert(path.clone(), priority);
                }
                None => {}
            }
        });
        self.deliver(deliveries, Self::complete(on_complete, result));
    }

    fn generate_push_id(&self) -> String {
        self.push_ids.next_id()
    }

    fn listen(&self, path: &Path, event: EventType, listener: Listener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let deliveries = {
            let mut state = self.state.lock();
            if state.is_denied(path) {
                active.store(false, Ordering::SeqCst);
                vec![Delivery {
                    listener,
                    active,
                    result: Err(StoreError::PermissionDenied {
                        path: path.to_string(),
                    }),
                }]
            } else {
                let initial: Vec<Snapshot> = match event {
                    EventType::Value => vec![state.snapshot(path)],
                    EventType::ChildAdded => {
                        let view = state.view(path);
                        view.children
                            .into_iter()
                            .map(|(key, (value, priority))| {
                                Snapshot::new(Some(key), value).with_priority(priority)
                            })
                            .collect()
                    }
                    _ => Vec::new(),
                };
                state.registrations.push(Registration {
                    id,
                    path: path.clone(),
                    event,
                    listener: Arc::clone(&listener),
                    active: Arc::clone(&active),
                });
                initial
                    .into_iter()
                    .map(|snapshot| Delivery {
                        listener: Arc::clone(&listener),
                        active: Arc::clone(&active),
                        result: Ok(snapshot),
                    })
                    .collect()
            }
        };
        self.deliver(deliveries, None);
        id
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        match state.registrations.iter().position(|r| r.id == id) {
            Some(index) => {
                let registration = state.registrations.remove(index);
                registration.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

fn get_at(root: &Value, path: &Path) -> Value {
    let mut node = root;
    for segment in path.segments() {
        match node.get(segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if value.is_null() {
        if let Value::Object(map) = node {
            if let Some(child) = map.get_mut(head) {
                set_at(child, rest, Value::Null);
                if child.is_null() {
                    map.remove(head);
                }
            }
            if map.is_empty() {
                *node = Value::Null;
            }
        }
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

/// Drops null children and collapses empty objects to null.
fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, child)| {
                    let child = prune(child);
                    (!child.is_null()).then_some((key, child))
                })
                .collect();
            if pruned.is_empty() {
                Value::Null
            } else {
                Value::Object(pruned)
            }
        }
        other => other,
    }
}

/// Moves `.priority` entries out of written objects.
fn extract_priorities(path: &Path, value: &mut Value, out: &mut Vec<(Path, Value)>) {
    if let Value::Object(map) = value {
        if let Some(priority) = map.remove(PRIORITY_KEY) {
            if !priority.is_null() {
                out.push((path.clone(), priority));
            }
        }
        for (key, child) in map.iter_mut() {
            extract_priorities(&path.push_unchecked(key.clone()), child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> Path {
        Path::parse(raw).unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<StoreResult<Snapshot>>>>, Listener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener = Arc::new(move |result| sink.lock().push(result));
        (seen, listener)
    }

    fn keys(seen: &Mutex<Vec<StoreResult<Snapshot>>>) -> Vec<String> {
        seen.lock()
            .iter()
            .map(|r| r.as_ref().unwrap().key().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn set_and_read() {
        let store = MemoryStore::new();
        store.set(&path("users/alice"), json!({"age": 3}), None, None);
        assert_eq!(store.value("users"), json!({"alice": {"age": 3}}));

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        store.read(&path("users/alice"), Box::new(move |r| *sink.lock() = Some(r)));
        let snap = seen.lock().take().unwrap().unwrap();
        assert_eq!(snap.key(), Some("alice"));
        assert_eq!(snap.val(), &json!({"age": 3}));
    }

    #[test]
    fn null_deletes_and_prunes_parents() {
        let store = MemoryStore::new();
        store.set(&path("a/b/c"), json!(1), None, None);
        store.set(&path("a/b/c"), Value::Null, None, None);
        assert_eq!(store.value("/"), Value::Null);

        store.set(&path("x"), json!({"y": null, "z": {}}), None, None);
        assert_eq!(store.value("x"), Value::Null);
    }

    #[test]
    fn update_merges_and_deletes() {
        let store = MemoryStore::new();
        store.set(&path("item"), json!({"a": 1, "b": 2}), None, None);
        let mut values = Map::new();
        values.insert("b".into(), Value::Null);
        values.insert("c".into(), json!(3));
        store.update(&path("item"), values, None);
        assert_eq!(store.value("item"), json!({"a": 1, "c": 3}));

        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].kind, WriteKind::Update);
        assert_eq!(writes[1].value, json!({"b": null, "c": 3}));
    }

    #[test]
    fn value_listener_fires_initially_and_on_change() {
        let store = MemoryStore::new();
        let (seen, listener) = recorder();
        store.listen(&path("node"), EventType::Value, listener);
        store.set(&path("node/x"), json!(1), None, None);
        store.set(&path("node/x"), json!(1), None, None);
        store.set(&path("other"), json!(1), None, None);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].as_ref().unwrap().val(), &Value::Null);
        assert_eq!(seen[1].as_ref().unwrap().val(), &json!({"x": 1}));
    }

    #[test]
    fn child_events() {
        let store = MemoryStore::new();
        store.set(&path("list/a"), json!({"n": 1}), None, None);

        let (added, on_added) = recorder();
        let (changed, on_changed) = recorder();
        let (removed, on_removed) = recorder();
        store.listen(&path("list"), EventType::ChildAdded, on_added);
        store.listen(&path("list"), EventType::ChildChanged, on_changed);
        store.listen(&path("list"), EventType::ChildRemoved, on_removed);
        assert_eq!(keys(&added), vec!["a"]);

        store.set(&path("list/b"), json!({"n": 2}), None, None);
        store.set(&path("list/a/n"), json!(5), None, None);
        store.set(&path("list/b"), Value::Null, None, None);

        assert_eq!(keys(&added), vec!["a", "b"]);
        assert_eq!(keys(&changed), vec!["a"]);
        assert_eq!(keys(&removed), vec!["b"]);
        let removed = removed.lock();
        assert_eq!(removed[0].as_ref().unwrap().val(), &json!({"n": 2}));
    }

    #[test]
    fn priority_changes_raise_moved_and_changed() {
        let store = MemoryStore::new();
        store.set(&path("list/a"), json!({"n": 1}), None, None);
        let (moved, on_moved) = recorder();
        let (changed, on_changed) = recorder();
        store.listen(&path("list"), EventType::ChildMoved, on_moved);
        store.listen(&path("list"), EventType::ChildChanged, on_changed);

        store.set(&path("list/a"), json!({"n": 1}), Some(json!(10)), None);
        assert_eq!(keys(&moved), vec!["a"]);
        assert_eq!(keys(&changed), vec!["a"]);
        assert_eq!(store.priority("list/a"), Some(json!(10)));
        assert_eq!(
            changed.lock()[0].as_ref().unwrap().priority(),
            Some(&json!(10))
        );
    }

    #[test]
    fn embedded_priority_is_extracted() {
        let store = MemoryStore::new();
        store.set(&path("p"), json!({"a": 1, ".priority": 4}), None, None);
        assert_eq!(store.value("p"), json!({"a": 1}));
        assert_eq!(store.priority("p"), Some(json!(4)));

        store.set(&path("p"), Value::Null, None, None);
        assert_eq!(store.priority("p"), None);
    }

    #[test]
    fn update_sets_priority_key() {
        let store = MemoryStore::new();
        store.set(&path("p"), json!({"a": 1}), None, None);
        let mut values = Map::new();
        values.insert("a".into(), json!(2));
        values.insert(PRIORITY_KEY.into(), json!(7));
        store.update(&path("p"), values, None);
        assert_eq!(store.value("p"), json!({"a": 2}));
        assert_eq!(store.priority("p"), Some(json!(7)));
    }

    #[test]
    fn events_precede_completion() {
        let store = MemoryStore::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        store.listen(
            &path("n"),
            EventType::ChildAdded,
            Arc::new(move |_| sink.lock().push("event")),
        );
        let sink = Arc::clone(&order);
        store.set(
            &path("n/k"),
            json!(1),
            None,
            Some(Box::new(move |r| {
                assert!(r.is_ok());
                sink.lock().push("complete");
            })),
        );
        assert_eq!(*order.lock(), vec!["event", "complete"]);
    }

    #[test]
    fn deferred_delivery_waits_for_flush() {
        let store = MemoryStore::deferred();
        let (seen, listener) = recorder();
        store.listen(&path("n"), EventType::Value, listener);
        store.set(&path("n"), json!(1), None, None);
        assert!(seen.lock().is_empty());
        assert_eq!(store.pending(), 2);
        assert_eq!(store.flush(), 2);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn unlisten_stops_queued_deliveries() {
        let store = MemoryStore::deferred();
        let (seen, listener) = recorder();
        let id = store.listen(&path("n"), EventType::Value, listener);
        assert!(store.unlisten(id));
        assert!(!store.unlisten(id));
        store.flush();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn denied_paths_reject_writes_and_cancel_listeners() {
        let store = MemoryStore::new();
        let (seen, listener) = recorder();
        store.listen(&path("secret/doc"), EventType::Value, listener);
        store.deny("secret").unwrap();

        assert_eq!(store.listener_count(), 0);
        let seen = seen.lock();
        assert!(matches!(seen.last(), Some(Err(StoreError::PermissionDenied { .. }))));

        let result = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&result);
        store.set(
            &path("secret/doc"),
            json!(1),
            None,
            Some(Box::new(move |r| *sink.lock() = Some(r))),
        );
        assert!(matches!(
            result.lock().take(),
            Some(Err(StoreError::PermissionDenied { .. }))
        ));
        assert_eq!(store.value("secret"), Value::Null);
    }

    #[test]
    fn disconnected_writes_fail() {
        let store = MemoryStore::new();
        store.set_connected(false);
        let result = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&result);
        store.set(&path("a"), json!(1), None, Some(Box::new(move |r| *sink.lock() = Some(r))));
        assert_eq!(result.lock().take(), Some(Err(StoreError::Disconnected)));
        store.set_connected(true);
        store.set(&path("a"), json!(1), None, None);
        assert_eq!(store.value("a"), json!(1));
    }

    #[test]
    fn reentrant_writes_from_listeners() {
        let store = Arc::new(MemoryStore::new());
        let inner = Arc::clone(&store);
        store.listen(
            &path("src"),
            EventType::Value,
            Arc::new(move |result| {
                if let Ok(snap) = result {
                    if snap.exists() {
                        inner.set(&Path::parse("mirror").unwrap(), snap.into_val(), None, None);
                    }
                }
            }),
        );
        store.set(&path("src"), json!("hello"), None, None);
        assert_eq!(store.value("mirror"), json!("hello"));
    }
}
