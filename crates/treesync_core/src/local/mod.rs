//! Local state: models, collections and their events.

mod collection;
mod events;
mod model;

pub use collection::{Collection, CollectionEvent};
pub use events::{EventEmitter, HandlerId};
pub use model::{Model, ModelEvent, ModelEventKind, RemoteApplyGuard, SyncGuard};
