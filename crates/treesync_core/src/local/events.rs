//! Typed synchronous event emitter.
//!
//! Emission works on a snapshot of the listener list: a listener removed
//! during an emission is still called in that round, and one added during
//! an emission is first called on the next. The list's lock is never held
//! while a listener runs, so listeners may register, unregister and emit.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies a registered handler.
pub type HandlerId = u64;

type Handler<T> = dyn Fn(&T) + Send + Sync;

/// A list of handlers for events of type `T`.
pub struct EventEmitter<T> {
    handlers: Mutex<Vec<(HandlerId, Arc<Handler<T>>)>>,
    next_id: AtomicU64,
}

impl<T> EventEmitter<T> {
    /// Creates an emitter with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `handler` and returns its id.
    pub fn on(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Calls every registered handler with `event`.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Arc<Handler<T>>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Returns true if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
