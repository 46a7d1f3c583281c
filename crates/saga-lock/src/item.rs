//! Items and the inventory they are drawn from.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::store::StoreError;

/// Opaque identifier for a claimable item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Item(Arc<str>);

impl Item {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Item {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Item {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// FIFO pool of unique items. The first element is the head.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Inventory {
    items: Vec<Item>,
}

impl Inventory {
    /// Build an inventory, rejecting duplicate items.
    pub fn new<I, T>(items: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Item>,
    {
        let mut out: Vec<Item> = Vec::new();
        for item in items {
            let item = item.into();
            if out.contains(&item) {
                return Err(StoreError::DuplicateItem(item));
            }
            out.push(item);
        }
        Ok(Self { items: out })
    }

    /// The item the next claim will target.
    pub fn head(&self) -> Option<&Item> {
        self.items.first()
    }

    pub fn contains(&self, item: &Item) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Copy of this inventory with the first occurrence of `item` removed.
    /// Order of the rest is preserved.
    pub(crate) fn without(&self, item: &Item) -> Self {
        let mut items = self.items.clone();
        if let Some(pos) = items.iter().position(|x| x == item) {
            items.remove(pos);
        }
        Self { items }
    }
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item:?}", item = item.as_str())?;
        }
        f.write_str("]")
    }
}
