//! Snapshots and realtime event kinds.

use serde_json::Value;
use std::fmt;

/// Realtime notification kinds a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// The value at the node changed (fires once on subscribe).
    Value,
    /// A child appeared (fires once per existing child on subscribe).
    ChildAdded,
    /// A child's value or priority changed.
    ChildChanged,
    /// A child disappeared.
    ChildRemoved,
    /// A child's priority changed, moving it in priority order.
    ChildMoved,
}

impl EventType {
    /// The four per-child event kinds, in delivery order.
    pub const CHILD_EVENTS: [EventType; 4] = [
        EventType::ChildRemoved,
        EventType::ChildAdded,
        EventType::ChildMoved,
        EventType::ChildChanged,
    ];

    /// Returns the wire name of this event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Value => "value",
            EventType::ChildAdded => "child_added",
            EventType::ChildChanged => "child_changed",
            EventType::ChildRemoved => "child_removed",
            EventType::ChildMoved => "child_moved",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time value read from one node.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    key: Option<String>,
    value: Value,
    priority: Option<Value>,
}

impl Snapshot {
    /// Creates a snapshot of `value` at the node named `key`.
    ///
    /// `key` is `None` only for the root node.
    pub fn new(key: Option<String>, value: Value) -> Self {
        Self {
            key,
            value,
            priority: None,
        }
    }

    /// Attaches the node's priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Option<Value>) -> Self {
        self.priority = priority;
        self
    }

    /// The node's key.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The node's value. `Value::Null` if the node does not exist.
    pub fn val(&self) -> &Value {
        &self.value
    }

    /// Consumes the snapshot, returning its value.
    pub fn into_val(self) -> Value {
        self.value
    }

    /// The node's priority, if one was set.
    pub fn priority(&self) -> Option<&Value> {
        self.priority.as_ref()
    }

    /// Returns true if the node holds data.
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_names() {
        assert_eq!(EventType::Value.as_str(), "value");
        assert_eq!(EventType::ChildMoved.to_string(), "child_moved");
        assert_eq!(EventType::CHILD_EVENTS.len(), 4);
    }

    #[test]
    fn snapshot_accessors() {
        let snap = Snapshot::new(Some("alice".into()), json!({"age": 3}))
            .with_priority(Some(json!(1)));
        assert_eq!(snap.key(), Some("alice"));
        assert!(snap.exists());
        assert_eq!(snap.priority(), Some(&json!(1)));
        assert_eq!(snap.into_val(), json!({"age": 3}));

        let empty = Snapshot::new(None, Value::Null);
        assert!(!empty.exists());
        assert_eq!(empty.key(), None);
    }
}
