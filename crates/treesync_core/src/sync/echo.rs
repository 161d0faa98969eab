//! Suppressing notifications caused by our own writes.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// The notification a suppressed write will produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EchoKind {
    /// A child write that will raise `child_added`.
    Added,
    /// A child delete that will raise `child_removed`.
    Removed,
}

/// Proof that a write expects to see its own echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoToken {
    kind: EchoKind,
    key: String,
    id: u64,
}

impl EchoToken {
    /// The child key the write targets.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The expected notification.
    pub fn kind(&self) -> EchoKind {
        self.kind
    }
}

/// Per-key ledger of pending echoes.
///
/// A silent write [`arm`](EchoGuard::arm)s a token for its child key. The
/// matching notification [`consume`](EchoGuard::consume)s it and is then
/// applied without emitting. When the write completes its token is
/// [`disarm`](EchoGuard::disarm)ed, so a write that raised no notification
/// (the child already existed, or the write failed) cannot swallow a later
/// genuine one.
#[derive(Debug, Default)]
pub struct EchoGuard {
    next_id: AtomicU64,
    pending: Mutex<HashMap<(EchoKind, String), VecDeque<u64>>>,
}

impl EchoGuard {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the next `kind` notification for `key` is an echo.
    pub fn arm(&self, kind: EchoKind, key: &str) -> EchoToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .entry((kind, key.to_string()))
            .or_default()
            .push_back(id);
        EchoToken {
            kind,
            key: key.to_string(),
            id,
        }
    }

    /// Consumes the oldest token for `key`. Returns true if the
    /// notification is an echo.
    pub fn consume(&self, kind: EchoKind, key: &str) -> bool {
        let mut pending = self.pending.lock();
        let slot = (kind, key.to_string());
        let Some(queue) = pending.get_mut(&slot) else {
            return false;
        };
        let consumed = queue.pop_front().is_some();
        if queue.is_empty() {
            pending.remove(&slot);
        }
        consumed
    }

    /// Releases a token that was never consumed. Returns true if it was
    /// still pending.
    pub fn disarm(&self, token: &EchoToken) -> bool {
        let mut pending = self.pending.lock();
        let slot = (token.kind, token.key.clone());
        let Some(queue) = pending.get_mut(&slot) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|id| *id != token.id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            pending.remove(&slot);
        }
        removed
    }

    /// Number of pending tokens.
    pub fn pending(&self) -> usize {
        self.pending.lock().values().map(VecDeque::len).sum()
    }
}
