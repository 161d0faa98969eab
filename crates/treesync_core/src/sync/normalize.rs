//! Turning remote snapshots into records.

use crate::attributes::{is_primitive, Attributes, PRIORITY_KEY};
use crate::error::{SyncError, SyncResult};
use serde_json::Value;
use treesync_store::Snapshot;

/// Builds a record from a node's raw value and key.
///
/// A null value becomes an empty record so later notifications can fill
/// it. The identifier attribute is always overwritten with `key`.
///
/// # Errors
///
/// Returns [`SyncError::InvalidIdentifier`] if `raw` is a primitive or an
/// array.
pub fn normalize(raw: Value, key: &str, id_attribute: &str) -> SyncResult<Attributes> {
    if is_primitive(&raw) {
        return Err(SyncError::InvalidIdentifier {
            key: key.to_string(),
        });
    }
    let mut record = match raw {
        Value::Object(map) => map,
        _ => Attributes::new(),
    };
    record.insert(id_attribute.to_string(), Value::String(key.to_string()));
    Ok(record)
}

/// Builds a record from a snapshot, carrying its priority as
/// [`PRIORITY_KEY`].
///
/// # Errors
///
/// Returns [`SyncError::MissingIdentifier`] for a snapshot of the root,
/// which has no key, and [`SyncError::InvalidIdentifier`] as
/// [`normalize`] does.
pub fn normalize_snapshot(snapshot: &Snapshot, id_attribute: &str) -> SyncResult<Attributes> {
    let key = snapshot.key().ok_or(SyncError::MissingIdentifier)?;
    let mut record = normalize(snapshot.val().clone(), key, id_attribute)?;
    if let Some(priority) = snapshot.priority() {
        record.insert(PRIORITY_KEY.to_string(), priority.clone());
    }
    Ok(record)
}
