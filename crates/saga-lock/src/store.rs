//! Shared state store - owns the inventory and applies actions to it.
//!
//! Callers read with `get()` and request changes with `dispatch()`; only the
//! reduction function produces new state. Observers registered with
//! `subscribe()` run synchronously after every successful dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::action::{Action, RemovePolicy, reduce};
use crate::item::{Inventory, Item};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate item in inventory: {0}")]
    DuplicateItem(Item),
    #[error("item not in inventory: {0}")]
    ItemNotFound(Item),
}

type Observer = Arc<dyn Fn(&Inventory) + Send + Sync>;

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

pub struct Store {
    state: Mutex<Inventory>,
    policy: RemovePolicy,
    observers: Mutex<Vec<(Subscription, Observer)>>,
    next_subscription: AtomicU64,
}

/// Lock recovering from poison. State is only replaced wholesale, so a
/// poisoned guard still holds a consistent value.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Store mutex poisoned - recovering");
            poisoned.into_inner()
        }
    }
}

impl Store {
    pub fn new(initial: Inventory, policy: RemovePolicy) -> Self {
        Self {
            state: Mutex::new(initial),
            policy,
            observers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RemovePolicy {
        self.policy
    }

    /// Snapshot of the current inventory.
    pub fn get(&self) -> Inventory {
        lock(&self.state).clone()
    }

    /// Apply `action` and notify observers with the resulting state.
    ///
    /// Runs to completion without suspending. A rejected action leaves the
    /// state untouched and notifies nobody.
    pub fn dispatch(&self, action: Action) -> Result<(), StoreError> {
        let snapshot = {
            let mut state = lock(&self.state);
            let next = reduce(&state, &action, self.policy)?;
            *state = next;
            state.clone()
        };

        tracing::debug!(?action, remaining = snapshot.len(), "Action applied");

        let observers: Vec<Observer> = lock(&self.observers)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(&snapshot);
        }
        Ok(())
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Inventory) + Send + Sync + 'static,
    {
        let subscription = Subscription(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.observers).push((subscription, Arc::new(observer)));
        subscription
    }

    /// Returns `false` if the subscription was unknown.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|(s, _)| *s != subscription);
        observers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(items: &[&str], policy: RemovePolicy) -> Store {
        Store::new(Inventory::new(items.iter().copied()).unwrap(), policy)
    }

    #[test]
    fn dispatch_replaces_state() {
        let store = store(&["a", "b", "c"], RemovePolicy::Ignore);
        store.dispatch(Action::remove("a")).unwrap();
        assert_eq!(store.get().items(), &[Item::from("b"), Item::from("c")]);
    }

    #[test]
    fn observers_see_new_state() {
        let store = store(&["a", "b"], RemovePolicy::Ignore);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |state| sink.lock().unwrap().push(state.len()));

        store.dispatch(Action::remove("a")).unwrap();
        store.dispatch(Action::remove("b")).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn observer_may_read_store() {
        let store = Arc::new(store(&["a"], RemovePolicy::Ignore));
        let seen = Arc::new(Mutex::new(None));
        let (inner, sink) = (Arc::clone(&store), Arc::clone(&seen));
        store.subscribe(move |_| *sink.lock().unwrap() = Some(inner.get()));

        store.dispatch(Action::remove("a")).unwrap();

        assert_eq!(seen.lock().unwrap().as_ref().map(Inventory::len), Some(0));
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = store(&["a", "b"], RemovePolicy::Ignore);
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let sub = store.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        store.dispatch(Action::remove("a")).unwrap();
        assert!(store.unsubscribe(sub));
        assert!(!store.unsubscribe(sub));
        store.dispatch(Action::remove("b")).unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn absent_remove_ignored_still_notifies() {
        let store = store(&["b"], RemovePolicy::Ignore);
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        store.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        store.dispatch(Action::remove("a")).unwrap();

        assert_eq!(store.get().len(), 1);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn absent_remove_rejected_without_notification() {
        let store = store(&["b"], RemovePolicy::Reject);
        assert_eq!(store.policy(), RemovePolicy::Reject);
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        store.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        let err = store.dispatch(Action::remove("a")).unwrap_err();

        assert_eq!(err, StoreError::ItemNotFound(Item::from("a")));
        assert_eq!(store.get().len(), 1);
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }
}
