//! The single funnel for local-origin reads and writes.

use super::relay::{completion_for, read_callback};
use crate::error::{SyncError, SyncResult};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use treesync_store::Reference;

/// A persistence operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Single value fetch.
    Read,
    /// Full overwrite.
    Create,
    /// Partial merge.
    Update,
    /// Overwrite with null.
    Delete,
}

impl Method {
    /// The operation's name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Read => "read",
            Method::Create => "create",
            Method::Update => "update",
            Method::Delete => "delete",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type SuccessFn = Arc<dyn Fn(Value) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(SyncError, Value) + Send + Sync>;

/// Success and error callbacks for one operation.
///
/// On success the callback receives the fetched value (reads) or the
/// written record (writes); on failure the error callback receives the
/// error and the same record.
#[derive(Clone, Default)]
pub struct SyncOptions {
    success: Option<SuccessFn>,
    error: Option<ErrorFn>,
}

impl SyncOptions {
    /// Options with no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the success callback.
    pub fn on_success(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.success = Some(Arc::new(f));
        self
    }

    /// Sets the error callback.
    pub fn on_error(mut self, f: impl Fn(SyncError, Value) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Invokes the success callback, if any.
    pub fn succeed(&self, value: Value) {
        if let Some(success) = &self.success {
            success(value);
        }
    }

    /// Invokes the error callback, if any.
    pub fn fail(&self, error: SyncError, value: Value) {
        if let Some(callback) = &self.error {
            callback(error, value);
        }
    }

    /// Runs `after` once the success callback has run.
    pub(crate) fn then(self, after: impl Fn(Value) + Send + Sync + 'static) -> Self {
        let success = self.success.clone();
        Self {
            success: Some(Arc::new(move |value: Value| {
                if let Some(success) = &success {
                    success(value.clone());
                }
                after(value);
            })),
            error: self.error,
        }
    }

    /// Runs `after` once the error callback has run.
    pub(crate) fn or_else(self, after: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        let error = self.error.clone();
        Self {
            success: self.success,
            error: Some(Arc::new(move |err: SyncError, value: Value| {
                after(&err);
                if let Some(error) = &error {
                    error(err, value);
                }
            })),
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// Something that can be persisted through [`sync`].
pub trait Syncable {
    /// The node the entity is stored at.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity's location cannot be resolved.
    fn sync_reference(&self) -> SyncResult<Reference>;

    /// The entity's serialized form.
    fn sync_payload(&self) -> Value;
}

/// Issues `method` against `reference`.
///
/// | method | remote action |
/// |---|---|
/// | read | single value fetch |
/// | create | `set` with `payload` |
/// | update | `update` with `payload` (`set` if it is not an object) |
/// | delete | `set` with null |
pub fn dispatch(method: Method, reference: &Reference, payload: Value, options: SyncOptions) {
    debug!(op = %method, path = %reference.path(), "dispatching");
    match method {
        Method::Read => reference.once(read_callback(options)),
        Method::Create => reference.set(payload.clone(), completion_for(payload, options)),
        Method::Update => match payload {
            Value::Object(values) => {
                let item = Value::Object(values.clone());
                reference.update(values, completion_for(item, options));
            }
            other => reference.set(other.clone(), completion_for(other, options)),
        },
        Method::Delete => reference.set(Value::Null, completion_for(payload, options)),
    }
}

/// Persists `entity` with `method`.
///
/// The payload is captured before the reference is resolved, so resolving
/// (which may attach listeners that rewrite local state) cannot alter what
/// gets written.
///
/// # Errors
///
/// Returns the error of [`Syncable::sync_reference`]. Remote failures are
/// reported through `options`.
pub fn sync(method: Method, entity: &dyn Syncable, options: SyncOptions) -> SyncResult<()> {
    let payload = entity.sync_payload();
    let reference = entity.sync_reference()?;
    dispatch(method, &reference, payload, options);
    Ok(())
}
