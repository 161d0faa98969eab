//! Attribute maps and the remote/local diff.

use serde_json::{Map, Value};

/// A record's attributes.
pub type Attributes = Map<String, Value>;

/// Attribute under which a node's priority is carried in a record.
pub const PRIORITY_KEY: &str = ".priority";

/// Computes the update that brings `remote` in line with `local`.
///
/// For every key in either map the result holds `Value::Null` if the key is
/// absent locally, the local value if the two differ, and nothing if they
/// are equal. Writing the result as a merge turns the remote node into
/// `local`.
pub fn compare_attributes(remote: &Attributes, local: &Attributes) -> Attributes {
    let mut update = Attributes::new();
    for (key, remote_value) in remote {
        match local.get(key) {
            None => {
                update.insert(key.clone(), Value::Null);
            }
            Some(local_value) if local_value != remote_value => {
                update.insert(key.clone(), local_value.clone());
            }
            Some(_) => {}
        }
    }
    for (key, local_value) in local {
        if !remote.contains_key(key) {
            update.insert(key.clone(), local_value.clone());
        }
    }
    update
}

/// Returns true for values that cannot hold an identifier attribute.
pub fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Null)
}

/// Renders an identifier attribute as a key. Only strings and numbers
/// qualify; empty strings do not.
pub fn identifier_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
