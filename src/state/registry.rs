use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::types::Stats;

pub type ViewerId = u64;

/// A live viewer as seen by the registry: the sending half of its session's
/// outbound queue. The session task owns the socket itself.
#[derive(Debug)]
pub struct Viewer {
    tx: mpsc::Sender<Stats>,
    registered_at: Instant,
}

impl Viewer {
    /// Queues a record without waiting. Fails if the queue is full or the
    /// session is gone.
    pub fn try_deliver(&self, stats: Stats) -> Result<(), TrySendError<Stats>> {
        self.tx.try_send(stats)
    }

    /// Records queued but not yet written to the socket.
    pub fn backlog(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }
}

/// All live viewers, behind one mapping-wide lock.
///
/// Every multi-entry operation (iteration, pruning, clearing) holds the lock
/// for its whole duration, so concurrent register/unregister calls never
/// interleave with a broadcast in progress.
pub struct ClientRegistry {
    viewers: Mutex<HashMap<ViewerId, Viewer>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ViewerId, Viewer>> {
        // A panic inside a visitor must not wedge every later broadcast.
        self.viewers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a viewer and returns its id. Ids are never reused.
    pub fn register(&self, tx: mpsc::Sender<Stats>) -> ViewerId {
        let mut viewers = self.lock();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        viewers.insert(id, Viewer { tx, registered_at: Instant::now() });
        id
    }

    /// Removes a viewer. Returns false if it was already gone.
    pub fn unregister(&self, id: ViewerId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn for_each(&self, mut visit: impl FnMut(ViewerId, &Viewer)) {
        let viewers = self.lock();
        for (&id, viewer) in viewers.iter() {
            visit(id, viewer);
        }
    }

    /// Visits every viewer under a single lock hold, removing those for which
    /// `keep` returns false. Returns how many were removed.
    pub fn retain(&self, mut keep: impl FnMut(ViewerId, &Viewer) -> bool) -> usize {
        let mut viewers = self.lock();
        let before = viewers.len();
        viewers.retain(|&id, viewer| keep(id, viewer));
        before - viewers.len()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, id: ViewerId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Drops every viewer's queue so each session winds down. Returns how many
    /// were registered.
    pub fn close_all(&self) -> usize {
        let mut viewers = self.lock();
        let n = viewers.len();
        viewers.clear();
        n
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self {
            viewers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
