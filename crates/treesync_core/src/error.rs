//! Error types for the sync engine.

use thiserror::Error;
use treesync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A remote value cannot carry an identifier (primitive or array).
    #[error("value at {key:?} is not an object; records must carry an identifier")]
    InvalidIdentifier {
        /// Key of the offending node.
        key: String,
    },

    /// A location descriptor could not be resolved to a reference.
    #[error("cannot resolve location {descriptor:?}: {reason}")]
    InvalidLocation {
        /// The descriptor as given.
        descriptor: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No database was configured at any level.
    #[error("no database configured")]
    MissingDatabase,

    /// The operation needs an identifier the record does not have.
    #[error("record has no identifier")]
    MissingIdentifier,

    /// The remote store reported an error.
    #[error("remote store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Creates an invalid location error.
    pub fn invalid_location(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the failed operation may be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}
