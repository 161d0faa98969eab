//! Error types for remote store operations.

use thiserror::Error;

/// Result type for remote store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a remote store.
///
/// These are always delivered asynchronously through completion callbacks
/// or listener cancellations, except for path and URL parsing which fail
/// synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store's access rules rejected the operation.
    #[error("permission denied at {path}")]
    PermissionDenied {
        /// The path the operation targeted.
        path: String,
    },

    /// The client is not connected to the store.
    #[error("not connected to remote store")]
    Disconnected,

    /// A path segment contains forbidden characters.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A URL does not point into this store.
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The store is temporarily unable to serve the request.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if a caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Disconnected | StoreError::Unavailable(_))
    }
}
