//! Per-entity locks
//!
//! Serializes read-validate-commit sequences on one account or loan.
//! Guards are owned so they can be held across `.await` points and
//! moved into the ledger's prepared postings. A slot is dropped from the
//! registry when its last guard is released and nobody is waiting on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type Slots = Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>;

fn open(slots: &Slots) -> MutexGuard<'_, HashMap<Uuid, Arc<AsyncMutex<()>>>> {
    match slots.lock() {
        Ok(slots) => slots,
        // the map holds no invariants a panic could break
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
pub struct EntityLocks {
    slots: Slots,
}

/// Exclusive access to one entity until dropped
#[derive(Debug)]
pub struct EntityGuard {
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    slot: Arc<AsyncMutex<()>>,
    slots: Slots,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        self.guard.take();

        // clones are only made under the map lock, so the count is stable here
        let mut slots = open(&self.slots);
        let idle = slots
            .get(&self.id)
            .is_some_and(|s| Arc::ptr_eq(s, &self.slot) && Arc::strong_count(s) == 2);
        if idle {
            slots.remove(&self.id);
        }
    }
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        open(&self.slots).entry(id).or_default().clone()
    }

    /// Wait for exclusive access to one entity
    pub async fn lock(&self, id: Uuid) -> EntityGuard {
        let slot = self.slot(id);
        let guard = slot.clone().lock_owned().await;
        EntityGuard {
            id,
            guard: Some(guard),
            slot,
            slots: self.slots.clone(),
        }
    }

    /// Lock several entities in ascending id order. Duplicates are locked once.
    pub async fn lock_many(&self, ids: &[Uuid]) -> Vec<EntityGuard> {
        let mut ordered = ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for id in ordered {
            guards.push(self.lock(id).await);
        }
        guards
    }

    /// Entities currently locked or awaited
    pub fn tracked(&self) -> usize {
        open(&self.slots).len()
    }
}
