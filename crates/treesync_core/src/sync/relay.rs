//! Turning remote outcomes into success/error callbacks.

use super::dispatch::SyncOptions;
use crate::error::SyncError;
use serde_json::Value;
use tracing::warn;
use treesync_store::{Completion, ReadCallback};

/// Builds a write completion that reports `item` to `options`.
///
/// Success passes `item` to the success callback; failure passes the error
/// and `item` to the error callback.
pub fn completion_for(item: Value, options: SyncOptions) -> Option<Completion> {
    Some(Box::new(move |result| match result {
        Ok(()) => options.succeed(item),
        Err(err) => {
            warn!(error = %err, "remote write failed");
            options.fail(SyncError::from(err), item);
        }
    }))
}

/// Builds a read callback that reports the node's value to `options`.
pub fn read_callback(options: SyncOptions) -> ReadCallback {
    Box::new(move |result| match result {
        Ok(snapshot) => options.succeed(snapshot.into_val()),
        Err(err) => {
            warn!(error = %err, "remote read failed");
            options.fail(SyncError::from(err), Value::Null);
        }
    })
}
