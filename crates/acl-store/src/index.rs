//! Ordered object index keyed by object id.
//!
//! The store keeps three of these (tables, rules, counters). Inserting an
//! existing key is an error and never replaces the stored value: a collision
//! means two callers were handed the same object id.

use std::collections::btree_map::{self, Entry};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::error::AclError;

/// Error type for index operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError<K> {
    /// Key already present.
    #[error("Duplicate key: {0}")]
    DuplicateKey(K),
    /// Key not present.
    #[error("Key not found: {0}")]
    NotFound(K),
}

impl<K: fmt::Display> IndexError<K> {
    /// Maps a collision to [`AclError::DuplicateKey`], and a miss to the
    /// caller's not-found error.
    pub fn into_acl_error(self, not_found: impl FnOnce(K) -> AclError) -> AclError {
        match self {
            Self::DuplicateKey(key) => AclError::DuplicateKey(key.to_string()),
            Self::NotFound(key) => not_found(key),
        }
    }
}

/// Ordered map of objects that refuses to overwrite.
#[derive(Debug, Clone)]
pub struct ObjectIndex<K: Ord, V> {
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for ObjectIndex<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy, V> ObjectIndex<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new entry; an existing entry is left untouched.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), IndexError<K>> {
        match self.entries.entry(key) {
            Entry::Occupied(_) => Err(IndexError::DuplicateKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    pub fn find(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Removes and returns an entry.
    pub fn remove(&mut self, key: &K) -> Result<V, IndexError<K>> {
        self.entries
            .remove(key)
            .ok_or(IndexError::NotFound(*key))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterates entries in ascending key order.
    pub fn iter(&self) -> btree_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, K, V> {
        self.entries.keys()
    }

    pub fn values(&self) -> btree_map::Values<'_, K, V> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a, K: Ord, V> IntoIterator for &'a ObjectIndex<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = btree_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
