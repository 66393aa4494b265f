// SPDX-License-Identifier: Apache-2.0

//! Reorderable ordered multiset over dense integer ids.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// An ordered multiset of `id`s keyed by an `i64` ranking key, ascending.
///
/// Callers encode "descending by memory" by inserting the negated value,
/// and encode "unusable sorts last" by inserting [`i64::MAX`] (or
/// [`i64::MIN`] for ascending orderings where unusable must sort first) —
/// the index itself has no notion of usability, only of a total order over
/// `(key, id)` pairs.
///
/// `reorder` is remove-then-reinsert under a new key while preserving the
/// caller's notion of identity (`id`): a primary ordered collection plus
/// a side table mapping id to its currently-registered key, so a caller
/// can cancel or reschedule a specific id without scanning the whole
/// collection.
#[derive(Debug, Clone, Default)]
pub struct OrderedIndex<Id: Eq + Hash + Ord + Copy> {
    entries: BTreeSet<(i64, Id)>,
    keys: HashMap<Id, i64>,
}

impl<Id: Eq + Hash + Ord + Copy> OrderedIndex<Id> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeSet::new(),
            keys: HashMap::new(),
        }
    }

    /// Inserts `id` with ranking `key`. Returns `false` without modifying
    /// the index if `id` is already present (use [`reorder`] to change an
    /// existing id's key).
    ///
    /// [`reorder`]: Self::reorder
    pub fn insert(&mut self, id: Id, key: i64) -> bool {
        if self.keys.contains_key(&id) {
            return false;
        }
        let _ = self.keys.insert(id, key);
        self.entries.insert((key, id))
    }

    /// Removes `id`, returning its last-known key.
    pub fn remove(&mut self, id: Id) -> Option<i64> {
        let key = self.keys.remove(&id)?;
        let _ = self.entries.remove(&(key, id));
        Some(key)
    }

    /// Removes and reinserts `id` under `new_key`, preserving identity.
    /// A no-op (returns the unchanged key) if `id` is not present.
    pub fn reorder(&mut self, id: Id, new_key: i64) -> Option<i64> {
        let old_key = self.remove(id)?;
        let _ = self.insert(id, new_key);
        Some(old_key)
    }

    /// The id with the smallest key, if any.
    #[must_use]
    pub fn leftmost(&self) -> Option<Id> {
        self.entries.iter().next().map(|(_, id)| *id)
    }

    /// Removes and returns the id with the smallest key, if any.
    pub fn pop_leftmost(&mut self) -> Option<(Id, i64)> {
        let entry = *self.entries.iter().next()?;
        let _ = self.entries.remove(&entry);
        let _ = self.keys.remove(&entry.1);
        Some((entry.1, entry.0))
    }

    /// Returns `id`'s currently-registered key.
    #[must_use]
    pub fn key_of(&self, id: Id) -> Option<i64> {
        self.keys.get(&id).copied()
    }

    /// True if `id` is present.
    #[must_use]
    pub fn contains(&self, id: Id) -> bool {
        self.keys.contains_key(&id)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visits ids in ascending-key (mid-)order.
    pub fn traverse_mid_order(&self) -> impl Iterator<Item = Id> + '_ {
        self.entries.iter().map(|(_, id)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_leftmost_remove() {
        let mut idx: OrderedIndex<u32> = OrderedIndex::new();
        assert!(idx.insert(1, 30));
        assert!(idx.insert(2, 10));
        assert!(idx.insert(3, 20));
        assert_eq!(idx.leftmost(), Some(2));
        assert_eq!(idx.remove(2), Some(10));
        assert_eq!(idx.leftmost(), Some(3));
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn reorder_preserves_identity_and_moves_key() {
        let mut idx: OrderedIndex<u32> = OrderedIndex::new();
        assert!(idx.insert(7, 100));
        assert!(idx.insert(8, 50));
        assert_eq!(idx.leftmost(), Some(8));
        assert_eq!(idx.reorder(7, 10), Some(100));
        assert_eq!(idx.leftmost(), Some(7));
        assert_eq!(idx.key_of(7), Some(10));
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn no_duplicate_by_identity() {
        let mut idx: OrderedIndex<u32> = OrderedIndex::new();
        assert!(idx.insert(1, 5));
        assert!(!idx.insert(1, 999));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.key_of(1), Some(5));
    }

    #[test]
    fn pop_leftmost_drains_without_duplicates() {
        let mut idx: OrderedIndex<u32> = OrderedIndex::new();
        for (id, key) in [(1, 3), (2, 1), (3, 2)] {
            assert!(idx.insert(id, key));
        }
        let mut order = Vec::new();
        while let Some((id, _)) = idx.pop_leftmost() {
            order.push(id);
        }
        assert_eq!(order, vec![2, 3, 1]);
        assert!(idx.is_empty());
    }

    use proptest::prop_assert_eq;

    proptest::proptest! {
        #[test]
        fn traverse_mid_order_is_sorted(keys in proptest::collection::vec(-1000i64..1000, 0..50)) {
            let mut idx: OrderedIndex<usize> = OrderedIndex::new();
            for (id, key) in keys.iter().enumerate() {
                idx.insert(id, *key);
            }
            let observed: Vec<i64> = idx.traverse_mid_order().map(|id| keys[id]).collect();
            let mut expected = keys.clone();
            expected.sort_unstable();
            prop_assert_eq!(observed, expected);
        }
    }
}
