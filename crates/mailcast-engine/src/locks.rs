//! Per-(campaign, recipient) locks.
//!
//! The due check, the send and the attempt append for one pair run under a
//! single lock, so overlapping cycles in the same process cannot both decide a
//! recipient is due and mail them twice. Separate processes are kept apart by
//! the store's dispatch claims instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use mailcast_core::types::{CampaignId, RecipientId};

type Slot = Arc<AsyncMutex<()>>;

#[derive(Default)]
pub struct PairLocks {
    slots: Mutex<HashMap<(CampaignId, RecipientId), Slot>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the pair.
    pub async fn acquire(&self, campaign: CampaignId, recipient: RecipientId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry((campaign, recipient)).or_default())
        };
        slot.lock_owned().await
    }

    /// Drop slots nobody holds or waits on.
    pub fn prune(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_pair_is_exclusive() {
        let locks = Arc::new(PairLocks::new());
        let guard = locks.acquire(1, 1).await;

        let other = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = other.acquire(1, 1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_pairs_do_not_block() {
        let locks = PairLocks::new();
        let _a = locks.acquire(1, 1).await;
        let _b = locks.acquire(1, 2).await;
        let _c = locks.acquire(2, 1).await;
        assert_eq!(locks.len(), 3);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_slots() {
        let locks = PairLocks::new();
        let held = locks.acquire(1, 1).await;
        drop(locks.acquire(1, 2).await);
        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
