//! The collection sync strategy seam and the state both strategies share.

use super::dispatch::{self, Method, SyncOptions, Syncable};
use super::entity::payload_of;
use super::normalize::normalize;
use super::resolver::{Location, ReferenceResolver};
use crate::attributes::{identifier_string, Attributes};
use crate::error::{SyncError, SyncResult};
use crate::local::{Collection, Model};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use tracing::debug;
use treesync_store::Reference;

/// How a collection follows its remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// One-shot reads; local edits are only written when asked.
    Snapshot,
    /// Continuous per-child listeners; local edits are written as they happen.
    Live,
}

/// Whether a membership change is announced to local listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notify {
    /// Emit `add`/`remove`/`reset` as usual.
    #[default]
    Emit,
    /// Change membership without events.
    Silent,
}

impl Notify {
    /// Returns true for [`Notify::Silent`].
    pub fn is_silent(self) -> bool {
        self == Notify::Silent
    }
}

/// Options for a collection fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Snapshot mode: replace the membership instead of merging.
    /// Live mode: re-attach the child listeners on a fresh reference.
    pub reset: bool,
    /// Completion callbacks.
    pub options: SyncOptions,
}

impl FetchOptions {
    /// Merging fetch without callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reset flag.
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Sets the completion callbacks.
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }
}

/// Behaviour a [`SyncedCollection`](super::SyncedCollection) delegates to.
///
/// Implemented by [`SnapshotStrategy`](super::SnapshotStrategy) and
/// [`LiveStrategy`](super::LiveStrategy); the choice is made once, when the
/// collection is built.
pub trait CollectionSyncStrategy: Send + Sync {
    /// The mode this strategy implements.
    fn mode(&self) -> SyncMode;

    /// The collection's reference, refreshed on request.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidLocation`] if the location does not resolve.
    fn reference(&self, refresh: bool) -> SyncResult<Reference>;

    /// Loads the remote membership.
    ///
    /// # Errors
    ///
    /// Returns resolution errors; remote failures go through the callbacks.
    fn fetch(&self, options: FetchOptions) -> SyncResult<()>;

    /// Adds records, minting push-ids for those without an identifier.
    ///
    /// Returns the records as prepared, identifiers included.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidIdentifier`] for an identifier that cannot
    /// name a child node.
    fn add(
        &self,
        records: Vec<Attributes>,
        notify: Notify,
        options: SyncOptions,
    ) -> SyncResult<Vec<Attributes>>;

    /// Adds one record and persists it.
    ///
    /// # Errors
    ///
    /// As [`add`](CollectionSyncStrategy::add).
    fn create(&self, record: Attributes, options: SyncOptions) -> SyncResult<Attributes>;

    /// Removes the members with the given identifiers.
    ///
    /// # Errors
    ///
    /// Returns resolution errors.
    fn remove(&self, ids: &[String], notify: Notify, options: SyncOptions) -> SyncResult<()>;

    /// Replaces the whole membership.
    ///
    /// # Errors
    ///
    /// As [`add`](CollectionSyncStrategy::add).
    fn reset(&self, records: Vec<Attributes>, notify: Notify) -> SyncResult<Vec<Attributes>>;

    /// Writes one member as it stands locally.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingIdentifier`] if the member has no identifier.
    fn save(&self, model: &Model, options: SyncOptions) -> SyncResult<()>;

    /// The persistence funnel: every strategy-issued read or write of a
    /// whole entity goes through here.
    ///
    /// # Errors
    ///
    /// Returns the entity's resolution error.
    fn sync(&self, method: Method, entity: &dyn Syncable, options: SyncOptions) -> SyncResult<()> {
        dispatch::sync(method, entity, options)
    }

    /// Detaches every listener the strategy owns.
    fn close(&self);
}

/// State shared by a collection and its strategy.
pub(crate) struct CollectionCore {
    pub(crate) collection: Collection,
    location: Location,
    resolver: ReferenceResolver,
    reference: Mutex<Option<Reference>>,
}

impl CollectionCore {
    pub(crate) fn new(collection: Collection, location: Location, resolver: ReferenceResolver) -> Self {
        Self {
            collection,
            location,
            resolver,
            reference: Mutex::new(None),
        }
    }

    pub(crate) fn id_attribute(&self) -> &str {
        self.collection.id_attribute()
    }

    /// The cached reference, resolved on first use or on `refresh`.
    pub(crate) fn reference(&self, refresh: bool) -> SyncResult<Reference> {
        if !refresh {
            if let Some(reference) = self.reference.lock().clone() {
                return Ok(reference);
            }
        }
        let reference = self.resolver.refresh(&self.location)?;
        debug!(path = %reference.path(), refresh, "collection reference resolved");
        *self.reference.lock() = Some(reference.clone());
        Ok(reference)
    }

    /// The child node for a member key.
    pub(crate) fn child(&self, key: &str) -> SyncResult<Reference> {
        if key.contains('/') {
            return Err(SyncError::InvalidIdentifier {
                key: key.to_string(),
            });
        }
        self.reference(false)?
            .child(key)
            .map_err(|_| SyncError::InvalidIdentifier {
                key: key.to_string(),
            })
    }

    /// Gives every record an identifier, minting push-ids where absent.
    pub(crate) fn prepare_records(
        &self,
        records: Vec<Attributes>,
    ) -> SyncResult<Vec<(String, Attributes)>> {
        let parent = self.reference(false)?;
        let id_attribute = self.id_attribute().to_string();
        records
            .into_iter()
            .map(|mut record| {
                let key = match record.get(&id_attribute).and_then(identifier_string) {
                    Some(key) => key,
                    None => {
                        let key = parent
                            .push()
                            .key()
                            .map(str::to_string)
                            .ok_or(SyncError::MissingIdentifier)?;
                        record.insert(id_attribute.clone(), Value::String(key.clone()));
                        key
                    }
                };
                self.child(&key)?;
                Ok((key, record))
            })
            .collect()
    }
}

impl fmt::Debug for CollectionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionCore")
            .field("collection", &self.collection)
            .field("location", &self.location)
            .finish()
    }
}

/// Flattens a keyed map into records, in the order the store returned it.
pub(crate) fn normalize_children(value: Value, id_attribute: &str) -> SyncResult<Vec<Attributes>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(children) => children
            .into_iter()
            .map(|(key, child)| normalize(child, &key, id_attribute))
            .collect(),
        _ => Err(SyncError::InvalidIdentifier { key: String::new() }),
    }
}

/// The payload written for a member: its attributes without the identifier.
pub(crate) fn record_payload(mut record: Attributes, id_attribute: &str) -> Value {
    record.remove(id_attribute);
    Value::Object(record)
}

/// A collection member addressed through its collection.
pub(crate) struct MemberTarget<'a> {
    pub(crate) core: &'a CollectionCore,
    pub(crate) model: &'a Model,
}

impl Syncable for MemberTarget<'_> {
    fn sync_reference(&self) -> SyncResult<Reference> {
        let id = self.model.id().ok_or(SyncError::MissingIdentifier)?;
        self.core.child(&id)
    }

    fn sync_payload(&self) -> Value {
        payload_of(self.model)
    }
}

/// The collection as a whole.
pub(crate) struct CollectionTarget<'a> {
    pub(crate) core: &'a CollectionCore,
}

impl Syncable for CollectionTarget<'_> {
    fn sync_reference(&self) -> SyncResult<Reference> {
        self.core.reference(false)
    }

    fn sync_payload(&self) -> Value {
        let children = self
            .core
            .collection
            .models()
            .iter()
            .filter_map(|model| model.id().map(|id| (id, payload_of(model))))
            .collect();
        Value::Object(children)
    }
}
