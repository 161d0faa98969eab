//! Resolving location descriptors to references.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::fmt;
use tracing::debug;
use treesync_store::{Database, Reference};

/// Where a record or collection lives remotely.
#[derive(Clone)]
pub enum Location {
    /// A slash-separated path off the database root, or an absolute URL.
    Text(String),
    /// An existing handle, used as is.
    Reference(Reference),
}

impl Location {
    /// A printable form of the location.
    pub fn descriptor(&self) -> String {
        match self {
            Location::Text(text) => text.clone(),
            Location::Reference(reference) => reference.url(),
        }
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({})", self.descriptor())
    }
}

impl From<&str> for Location {
    fn from(text: &str) -> Self {
        Location::Text(text.to_string())
    }
}

impl From<String> for Location {
    fn from(text: String) -> Self {
        Location::Text(text)
    }
}

impl From<Reference> for Location {
    fn from(reference: Reference) -> Self {
        Location::Reference(reference)
    }
}

impl From<&Reference> for Location {
    fn from(reference: &Reference) -> Self {
        Location::Reference(reference.clone())
    }
}

/// Resolves `location` against `database`.
///
/// Text matching the database's host pattern is resolved as a URL;
/// anything else as a path off the root.
///
/// # Errors
///
/// Returns [`SyncError::InvalidLocation`] for empty text, URLs for another
/// store and malformed paths.
pub fn resolve(database: &Database, location: &Location) -> SyncResult<Reference> {
    let text = match location {
        Location::Reference(reference) => return Ok(reference.clone()),
        Location::Text(text) => text.trim(),
    };
    if text.is_empty() {
        return Err(SyncError::invalid_location(text, "empty location"));
    }
    let resolved = if database.is_store_url(text) {
        database.reference_from_url(text)
    } else {
        database.reference(text)
    };
    resolved.map_err(|err| SyncError::invalid_location(text, err.to_string()))
}

/// A resolver that remembers its last result.
///
/// Resolving the same descriptor again returns the same handle until
/// [`refresh`](ReferenceResolver::refresh) builds a new one.
pub struct ReferenceResolver {
    database: Database,
    cached: Mutex<Option<(String, Reference)>>,
}

impl ReferenceResolver {
    /// Creates a resolver over `database`.
    pub fn new(database: Database) -> Self {
        Self {
            database,
            cached: Mutex::new(None),
        }
    }

    /// The database locations resolve against.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Resolves `location`, reusing the cached handle for the same descriptor.
    ///
    /// # Errors
    ///
    /// As [`resolve`].
    pub fn resolve(&self, location: &Location) -> SyncResult<Reference> {
        let descriptor = location.descriptor();
        if let Some((cached, reference)) = self.cached.lock().as_ref() {
            if *cached == descriptor {
                return Ok(reference.clone());
            }
        }
        self.refresh(location)
    }

    /// Resolves `location` into a new handle and caches it.
    ///
    /// # Errors
    ///
    /// As [`resolve`].
    pub fn refresh(&self, location: &Location) -> SyncResult<Reference> {
        let reference = resolve(&self.database, location)?;
        debug!(location = %location.descriptor(), path = %reference.path(), "reference resolved");
        *self.cached.lock() = Some((location.descriptor(), reference.clone()));
        Ok(reference)
    }

    /// The cached handle, if any.
    pub fn cached(&self) -> Option<Reference> {
        self.cached.lock().as_ref().map(|(_, r)| r.clone())
    }

    /// Forgets the cached handle.
    pub fn clear(&self) {
        *self.cached.lock() = None;
    }
}

impl fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("database", &self.database)
            .field("cached", &self.cached())
            .finish()
    }
}
