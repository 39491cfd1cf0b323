use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::domain::DocumentId;

/// Unused lock entries are pruned once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// One reader/writer lock per document id.
///
/// Guards are owned so they can be moved into spawned tasks that must finish even when
/// the caller is dropped.
#[derive(Default)]
pub struct IdLocks {
    locks: Mutex<HashMap<DocumentId, Arc<RwLock<()>>>>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: DocumentId) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(id).or_default().clone()
    }

    pub async fn read(&self, id: DocumentId) -> OwnedRwLockReadGuard<()> {
        self.entry(id).read_owned().await
    }

    pub async fn write(&self, id: DocumentId) -> OwnedRwLockWriteGuard<()> {
        self.entry(id).write_owned().await
    }
}

/// Ids with a build in progress.
#[derive(Default, Clone)]
pub struct BuildClaims {
    active: Arc<Mutex<HashSet<DocumentId>>>,
}

impl BuildClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` when another build of `id` holds the claim.
    pub fn claim(&self, id: DocumentId) -> Option<BuildClaim> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.insert(id).then(|| BuildClaim {
            claims: self.clone(),
            id,
        })
    }

    pub fn is_active(&self, id: DocumentId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }
}

/// Released on drop, including when the build future is cancelled.
pub struct BuildClaim {
    claims: BuildClaims,
    id: DocumentId,
}

impl Drop for BuildClaim {
    fn drop(&mut self) {
        self.claims
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
