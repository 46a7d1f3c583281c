//! Actions and the pure reduction function applied by the store.

use serde::Serialize;

use crate::item::{Inventory, Item};
use crate::store::StoreError;

/// Intended state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Remove { item: Item },
}

impl Action {
    pub fn remove(item: impl Into<Item>) -> Self {
        Self::Remove { item: item.into() }
    }
}

/// What `Remove` does when the item is no longer in the inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovePolicy {
    /// Silently leave the state unchanged.
    #[default]
    Ignore,
    /// Fail the dispatch with `StoreError::ItemNotFound`.
    Reject,
}

/// Compute the next state. Never mutates `state`.
pub fn reduce(
    state: &Inventory,
    action: &Action,
    policy: RemovePolicy,
) -> Result<Inventory, StoreError> {
    match action {
        Action::Remove { item } => {
            if !state.contains(item) && policy == RemovePolicy::Reject {
                return Err(StoreError::ItemNotFound(item.clone()));
            }
            Ok(state.without(item))
        }
    }
}
