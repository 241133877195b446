use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::models::Snapshot;

/// Holds the one published snapshot.
///
/// The write lock is held only for the pointer swap, so readers are never
/// blocked for the length of a probe.
pub struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
    cycles: watch::Sender<u64>,
}

impl SnapshotStore {
    pub fn new(initial: Snapshot) -> Self {
        let (cycles, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(initial)),
            cycles,
        }
    }

    pub async fn current(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    /// Replaces the snapshot wholesale and bumps the cycle counter.
    /// Returns the snapshot that was installed.
    pub async fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(snapshot);
        *self.current.write().await = Arc::clone(&next);
        self.cycles.send_modify(|count| *count += 1);
        next
    }

    /// Number of cycles published so far.
    pub fn cycles(&self) -> u64 {
        *self.cycles.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.cycles.subscribe()
    }
}
