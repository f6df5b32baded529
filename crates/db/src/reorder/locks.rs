//! Per-board async locks.
//!
//! Every mutation takes the locks of the boards it touches before opening its
//! transaction, so two collaborators dragging on the same board are serialized in
//! process while other boards proceed. Locks are always taken in ascending id
//! order, which rules out lock-order deadlocks for cross-board moves.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct BoardLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

/// Holds board locks until dropped; idle entries are pruned on release.
pub struct BoardLockGuard {
    guards: Vec<(Uuid, OwnedMutexGuard<()>)>,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl BoardLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, board_ids: &[Uuid]) -> BoardLockGuard {
        let mut ids = board_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            // Clone the Arc out so no map shard stays locked across the await.
            let mutex = self.locks.entry(id).or_default().clone();
            guards.push((id, mutex.lock_owned().await));
        }

        BoardLockGuard {
            guards,
            locks: self.locks.clone(),
        }
    }

    /// Number of boards with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

impl BoardLockGuard {
    pub fn board_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.guards.iter().map(|(id, _)| *id)
    }
}

impl Drop for BoardLockGuard {
    fn drop(&mut self) {
        for (id, guard) in self.guards.drain(..) {
            drop(guard);
            // Only the map itself still holds the mutex: nobody is waiting on it.
            self.locks
                .remove_if(&id, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}
