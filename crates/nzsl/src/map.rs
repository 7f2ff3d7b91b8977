//! An insertion-order-preserving map used everywhere the compiler must keep
//! declaration order observable (struct fields, function parameters,
//! external variables, imports — spec §5 "insertion-ordered maps are used
//! where order is observable").
//!
//! Wraps [`indexmap::IndexMap`] and adds [`OrderedMap::validate_insert`] so
//! every pass that registers a name (functions, structs, variables, …) gets
//! duplicate-declaration detection for free, without hard-coding any one
//! error type into the map itself.

use std::hash::Hash;

use indexmap::{Equivalent, IndexMap};

/// A hash map that remembers insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<K: Hash + Eq, V> {
    map: IndexMap<K, V>,
}

impl<K: Hash + Eq, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self { map: IndexMap::new() }
    }
}

impl<K: Hash + Eq, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain insert, last write wins (used where duplicates are legal,
    /// e.g. the module resolver's by-name cache).
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    /// Inserts `value`, invoking `on_duplicate(&old, &new)` to build a
    /// caller-specific error if `key` was already present. The insertion
    /// still happens (last write wins) so callers can keep resolving with
    /// best-effort recovery under `--partial`.
    pub fn validate_insert<E>(
        &mut self,
        key: K,
        value: V,
        on_duplicate: impl FnOnce(&V, &V) -> E,
    ) -> Result<(), E> {
        match self.map.get(&key) {
            Some(old) => {
                let err = on_duplicate(old, &value);
                self.map.insert(key, value);
                Err(err)
            }
            None => {
                self.map.insert(key, value);
                Ok(())
            }
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.map.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.map.get_mut(key)
    }

    pub fn get_index_mut(&mut self, index: usize) -> Option<(&K, &mut V)> {
        self.map.get_index_mut(index)
    }

    pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
        self.map.get_index(index)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.map.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.map.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: Hash + Eq, V> IntoIterator for OrderedMap<K, V> {
    type Item = (K, V);
    type IntoIter = indexmap::map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for OrderedMap<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self { map: IndexMap::from_iter(iter) }
    }
}
