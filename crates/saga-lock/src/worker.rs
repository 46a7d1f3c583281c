//! Worker routines - claim the head item of the shared inventory.
//!
//! Both variants run the same sequence:
//! 1. Select: read the store, take the head item (empty → `InsufficientItems`)
//! 2. Yield to the interleaving hook
//! 3. Claim: dispatch `Remove` for that item
//! 4. Return the item
//!
//! The locked variant holds the semaphore across all four steps.

use std::sync::Arc;

use serde::Serialize;

use crate::action::Action;
use crate::interleave::Interleave;
use crate::item::Item;
use crate::permit::{Semaphore, SemaphoreError};
use crate::store::{Store, StoreError};

/// Which worker routine the orchestrator forks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Unlocked,
    Locked,
}

impl Variant {
    pub fn from_lock_flag(enable_lock: bool) -> Self {
        if enable_lock {
            Self::Locked
        } else {
            Self::Unlocked
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("insufficient items")]
    InsufficientItems,
    #[error("claim rejected: {0}")]
    Claim(#[from] StoreError),
    #[error(transparent)]
    Semaphore(#[from] SemaphoreError),
}

impl WorkerError {
    /// Normal outcome when the inventory ran dry before this worker.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::InsufficientItems)
    }
}

/// Everything a worker needs, shared by all workers of one run.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<Store>,
    pub semaphore: Arc<Semaphore>,
    pub interleave: Arc<dyn Interleave>,
}

/// Unsynchronized select-then-claim.
pub async fn pop_item(store: &Store, interleave: &dyn Interleave) -> Result<Item, WorkerError> {
    let inventory = store.get();
    let Some(item) = inventory.head().cloned() else {
        tracing::debug!("No items left to claim");
        interleave.skipped();
        return Err(WorkerError::InsufficientItems);
    };
    tracing::debug!(%item, "Selected head item");

    interleave.after_select().await;

    store.dispatch(Action::remove(item.clone()))?;
    tracing::debug!(%item, "Claimed item");
    Ok(item)
}

/// `pop_item` inside the semaphore. The permit is released whether the
/// claim succeeds or fails.
pub async fn pop_item_with_lock(
    store: &Store,
    semaphore: &Arc<Semaphore>,
    interleave: &dyn Interleave,
) -> Result<Item, WorkerError> {
    let permit = match semaphore.try_acquire() {
        Some(permit) => permit,
        None => {
            interleave.parked();
            let acquired = semaphore.acquire().await;
            interleave.unparked();
            acquired?
        }
    };
    tracing::trace!("Entered critical section");
    let result = pop_item(store, interleave).await;
    permit.release();
    result
}

pub async fn run_worker(variant: Variant, ctx: WorkerContext) -> Result<Item, WorkerError> {
    match variant {
        Variant::Unlocked => pop_item(&ctx.store, ctx.interleave.as_ref()).await,
        Variant::Locked => {
            pop_item_with_lock(&ctx.store, &ctx.semaphore, ctx.interleave.as_ref()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RemovePolicy;
    use crate::interleave::{Lockstep, Uninterrupted, YieldNow};
    use crate::item::Inventory;

    fn store(items: &[&str], policy: RemovePolicy) -> Arc<Store> {
        Arc::new(Store::new(Inventory::new(items.iter().copied()).unwrap(), policy))
    }

    #[tokio::test]
    async fn pop_takes_head() {
        let store = store(&["a", "b"], RemovePolicy::Ignore);
        let item = pop_item(&store, &Uninterrupted).await.unwrap();
        assert_eq!(item, Item::from("a"));
        assert_eq!(store.get().items(), &[Item::from("b")]);
    }

    #[tokio::test]
    async fn pop_on_empty_fails() {
        let store = store(&[], RemovePolicy::Ignore);
        let err = pop_item(&store, &YieldNow).await.unwrap_err();
        assert_eq!(err, WorkerError::InsufficientItems);
        assert!(err.is_exhaustion());
    }

    #[tokio::test]
    async fn locked_pop_releases_on_failure() {
        let store = store(&[], RemovePolicy::Ignore);
        let sem = Arc::new(Semaphore::mutex());

        let err = pop_item_with_lock(&store, &sem, &YieldNow).await.unwrap_err();

        assert!(err.is_exhaustion());
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn lockstep_unlocked_workers_claim_same_item() {
        let store = store(&["a", "b"], RemovePolicy::Ignore);
        let lockstep: Arc<dyn Interleave> = Arc::new(Lockstep::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (store, lockstep) = (Arc::clone(&store), Arc::clone(&lockstep));
                tokio::spawn(async move { pop_item(&store, lockstep.as_ref()).await })
            })
            .collect();

        let mut items = Vec::new();
        for handle in handles {
            items.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(items, vec![Item::from("a"), Item::from("a")]);
        assert_eq!(store.get().items(), &[Item::from("b")]);
    }

    #[tokio::test]
    async fn lockstep_with_reject_policy_fails_second_claim() {
        let store = store(&["a", "b"], RemovePolicy::Reject);
        let lockstep: Arc<dyn Interleave> = Arc::new(Lockstep::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (store, lockstep) = (Arc::clone(&store), Arc::clone(&lockstep));
                tokio::spawn(async move { pop_item(&store, lockstep.as_ref()).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(WorkerError::Claim(StoreError::ItemNotFound(_)))))
            .count();
        assert_eq!(rejected, 1);
        assert!(results.contains(&Ok(Item::from("a"))));
    }

    #[tokio::test]
    async fn locked_workers_never_share_an_item() {
        let store = store(&["a", "b", "c"], RemovePolicy::Ignore);
        let ctx = WorkerContext {
            store: Arc::clone(&store),
            semaphore: Arc::new(Semaphore::mutex()),
            interleave: Arc::new(YieldNow),
        };

        let handles: Vec<_> = (0..3)
            .map(|_| tokio::spawn(run_worker(Variant::Locked, ctx.clone())))
            .collect();

        let mut items = Vec::new();
        for handle in handles {
            items.push(handle.await.unwrap().unwrap());
        }
        items.sort();

        assert_eq!(items, vec![Item::from("a"), Item::from("b"), Item::from("c")]);
        assert!(store.get().is_empty());
    }

    #[tokio::test]
    async fn lockstep_locked_workers_take_turns() {
        let store = store(&["a", "b"], RemovePolicy::Ignore);
        let ctx = WorkerContext {
            store: Arc::clone(&store),
            semaphore: Arc::new(Semaphore::mutex()),
            interleave: Arc::new(Lockstep::new(2)),
        };

        let handles: Vec<_> = (0..2)
            .map(|_| tokio::spawn(run_worker(Variant::Locked, ctx.clone())))
            .collect();

        let mut items = Vec::new();
        for handle in handles {
            items.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(items, vec![Item::from("a"), Item::from("b")]);
        assert!(store.get().is_empty());
        assert_eq!(ctx.semaphore.available_permits(), 1);
    }

    #[test]
    fn variant_from_flag() {
        assert_eq!(Variant::from_lock_flag(true), Variant::Locked);
        assert_eq!(Variant::from_lock_flag(false), Variant::Unlocked);
        assert_eq!(Variant::default(), Variant::Unlocked);
    }
}
