//! Least Frequently Used (LFU) Eviction, Bucketed
//!
//! Entries are grouped into buckets keyed by their exact access count
//! (saturating at a small ceiling). An access moves the entry's node from its
//! current bucket to the next higher one; the victim comes from the lowest
//! non-empty bucket.
//!
//! ```text
//! bucket 1: [d] ◀──▶ [c]        <- victims come from here, LRU within bucket
//! bucket 2: [a]
//! bucket 5: [b]
//! ```
//!
//! Each bucket is its own list over the shared node arena, so promotion is an
//! O(1) unlink/relink plus an O(log buckets) map step, effectively constant
//! for the small bucket counts that saturation produces. Within a bucket,
//! newly promoted entries go to the front, so the bucket's back is its own
//! least-recently-promoted entry: frequency decides first, recency breaks
//! ties.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use super::arena::{Node, NodeArena, SlotList};

/// Frequency counts saturate here; beyond this, popularity differences no
/// longer matter for victim selection.
const FREQUENCY_CEILING: u32 = 255;

/// Bucketed LFU ordering over policy nodes.
#[derive(Debug)]
pub(crate) struct LfuPolicy<K> {
    arena: NodeArena<K, u32>,
    index: HashMap<K, u32>,
    buckets: BTreeMap<u32, SlotList>,
}

impl<K: core::hash::Hash + Eq + Clone> LfuPolicy<K> {
    pub(crate) fn new() -> Self {
        LfuPolicy {
            arena: NodeArena::new(),
            index: HashMap::new(),
            buckets: BTreeMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn record_access(&mut self, key: &K) {
        if let Some(&slot) = self.index.get(key) {
            self.promote(slot);
        }
    }

    pub(crate) fn record_insert(&mut self, key: K, hash: u64, version: u64, weight: u64) {
        let slot = self
            .arena
            .insert(Node::new(key.clone(), hash, version, weight, 1));
        self.index.insert(key, slot);
        self.buckets
            .entry(1)
            .or_insert_with(SlotList::new)
            .push_front(&mut self.arena, slot);
    }

    /// Overwrite: refresh version/weight and count the write as an access.
    pub(crate) fn record_update(&mut self, key: &K, hash: u64, version: u64, weight: u64) {
        match self.index.get(key) {
            Some(&slot) => {
                {
                    let node = self.arena.get_mut(slot);
                    node.version = version;
                    node.weight = weight;
                }
                self.promote(slot);
            }
            None => self.record_insert(key.clone(), hash, version, weight),
        }
    }

    pub(crate) fn record_remove(&mut self, key: &K, version: u64) -> Option<u64> {
        let &slot = self.index.get(key)?;
        let bucket = {
            let node = self.arena.get(slot);
            if node.version != version {
                return None;
            }
            node.meta
        };
        self.index.remove(key);
        self.detach(bucket, slot);
        Some(self.arena.remove(slot).weight)
    }

    /// Back of the lowest non-empty bucket.
    pub(crate) fn candidate(&self) -> Option<(K, u64)> {
        let (_, list) = self.buckets.iter().next()?;
        let slot = list.tail()?;
        let node = self.arena.get(slot);
        Some((node.key.clone(), node.version))
    }

    pub(crate) fn clear(&mut self) {
        self.arena.clear();
        self.index.clear();
        self.buckets.clear();
    }

    /// Moves `slot` one bucket up, saturating at the ceiling.
    fn promote(&mut self, slot: u32) {
        let current = self.arena.get(slot).meta;
        let next = current.saturating_add(1).min(FREQUENCY_CEILING);
        if next == current {
            // Saturated: refresh recency within the bucket instead.
            if let Some(list) = self.buckets.get_mut(&current) {
                list.move_to_front(&mut self.arena, slot);
            }
            return;
        }
        self.detach(current, slot);
        self.arena.get_mut(slot).meta = next;
        self.buckets
            .entry(next)
            .or_insert_with(SlotList::new)
            .push_front(&mut self.arena, slot);
    }

    /// Unlinks `slot` from `bucket`, dropping the bucket when it empties.
    fn detach(&mut self, bucket: u32, slot: u32) {
        if let Some(list) = self.buckets.get_mut(&bucket) {
            list.unlink(&mut self.arena, slot);
            if list.is_empty() {
                self.buckets.remove(&bucket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_is_least_frequent() {
        let mut policy = LfuPolicy::new();
        policy.record_insert("rare", 0, 1, 1);
        policy.record_insert("popular", 0, 2, 1);
        for _ in 0..10 {
            policy.record_access(&"popular");
        }
        assert_eq!(policy.candidate(), Some(("rare", 1)));
    }

    #[test]
    fn test_ties_broken_by_recency_within_bucket() {
        let mut policy = LfuPolicy::new();
        policy.record_insert("a", 0, 1, 1);
        policy.record_insert("b", 0, 2, 1);
        // Both in bucket 1; "a" was inserted earlier, so it is the bucket's back.
        assert_eq!(policy.candidate(), Some(("a", 1)));
    }

    #[test]
    fn test_access_promotes_out_of_victim_bucket() {
        let mut policy = LfuPolicy::new();
        policy.record_insert("a", 0, 1, 1);
        policy.record_insert("b", 0, 2, 1);
        policy.record_access(&"a");
        assert_eq!(policy.candidate(), Some(("b", 2)));
    }

    #[test]
    fn test_frequency_saturates_without_panic() {
        let mut policy = LfuPolicy::new();
        policy.record_insert("hot", 0, 1, 1);
        for _ in 0..(FREQUENCY_CEILING * 2) {
            policy.record_access(&"hot");
        }
        assert_eq!(policy.candidate(), Some(("hot", 1)));
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_remove_respects_version() {
        let mut policy = LfuPolicy::new();
        policy.record_insert("a", 0, 1, 1);
        assert_eq!(policy.record_remove(&"a", 2), None);
        assert_eq!(policy.record_remove(&"a", 1), Some(1));
        assert_eq!(policy.candidate(), None);
    }

    #[test]
    fn test_empty_buckets_are_dropped() {
        let mut policy = LfuPolicy::new();
        policy.record_insert("a", 0, 1, 1);
        policy.record_access(&"a");
        policy.record_access(&"a");
        assert_eq!(policy.buckets.len(), 1);
        assert!(policy.buckets.contains_key(&3));
    }
}
