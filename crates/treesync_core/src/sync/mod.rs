//! The sync engine: resolving locations, normalizing snapshots, the
//! dispatch funnel and the per-record and per-collection controllers.

mod collection;
mod dispatch;
mod echo;
mod entity;
mod live;
mod normalize;
mod relay;
mod resolver;
mod snapshot;
mod strategy;

pub use collection::{SyncedCollection, SyncedCollectionBuilder};
pub use dispatch::{dispatch, sync, Method, SyncOptions, Syncable};
pub use echo::{EchoGuard, EchoKind, EchoToken};
pub use entity::{ModelLocation, SyncedModel, SyncedModelBuilder};
pub use live::LiveStrategy;
pub use normalize::{normalize, normalize_snapshot};
pub use relay::{completion_for, read_callback};
pub use resolver::{resolve, Location, ReferenceResolver};
pub use snapshot::SnapshotStrategy;
pub use strategy::{CollectionSyncStrategy, FetchOptions, Notify, SyncMode};
