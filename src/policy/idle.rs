//! Idle-Time Eviction
//!
//! Evicts entries that have gone unaccessed for longer than a configured
//! idle limit. Nodes are kept in access order (an LRU list), so the back of
//! the list is always the entry idle the longest; the candidate check is a
//! single comparison against the idle limit.
//!
//! When even the most idle entry is still within the limit, no candidate is
//! offered; the facade falls back to an arbitrary-entry scan if a capacity
//! bound forces an eviction anyway.

use hashbrown::HashMap;

use super::arena::{Node, NodeArena, SlotList};

/// Idle-time ordering; node metadata is the last-access tick.
#[derive(Debug)]
pub(crate) struct IdlePolicy<K> {
    arena: NodeArena<K, u64>,
    index: HashMap<K, u32>,
    list: SlotList,
    idle_limit_ns: u64,
}

impl<K: core::hash::Hash + Eq + Clone> IdlePolicy<K> {
    pub(crate) fn new(idle_limit_ns: u64) -> Self {
        IdlePolicy {
            arena: NodeArena::new(),
            index: HashMap::new(),
            list: SlotList::new(),
            idle_limit_ns,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn record_access(&mut self, key: &K, now_ns: u64) {
        if let Some(&slot) = self.index.get(key) {
            self.arena.get_mut(slot).meta = now_ns;
            self.list.move_to_front(&mut self.arena, slot);
        }
    }

    pub(crate) fn record_insert(&mut self, key: K, hash: u64, version: u64, weight: u64, now_ns: u64) {
        let slot = self
            .arena
            .insert(Node::new(key.clone(), hash, version, weight, now_ns));
        self.index.insert(key, slot);
        self.list.push_front(&mut self.arena, slot);
    }

    pub(crate) fn record_update(&mut self, key: &K, hash: u64, version: u64, weight: u64, now_ns: u64) {
        match self.index.get(key) {
            Some(&slot) => {
                {
                    let node = self.arena.get_mut(slot);
                    node.version = version;
                    node.weight = weight;
                    node.meta = now_ns;
                }
                self.list.move_to_front(&mut self.arena, slot);
            }
            None => self.record_insert(key.clone(), hash, version, weight, now_ns),
        }
    }

    pub(crate) fn record_remove(&mut self, key: &K, version: u64) -> Option<u64> {
        let &slot = self.index.get(key)?;
        if self.arena.get(slot).version != version {
            return None;
        }
        self.index.remove(key);
        self.list.unlink(&mut self.arena, slot);
        Some(self.arena.remove(slot).weight)
    }

    /// The longest-idle entry, but only when it is actually past the limit.
    pub(crate) fn candidate(&self, now_ns: u64) -> Option<(K, u64)> {
        let slot = self.list.tail()?;
        let node = self.arena.get(slot);
        if now_ns.saturating_sub(node.meta) > self.idle_limit_ns {
            Some((node.key.clone(), node.version))
        } else {
            None
        }
    }

    pub(crate) fn clear(&mut self) {
        self.arena.clear();
        self.index.clear();
        self.list.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 1_000;

    #[test]
    fn test_no_candidate_while_everything_is_fresh() {
        let mut policy = IdlePolicy::new(LIMIT);
        policy.record_insert("a", 0, 1, 1, 100);
        policy.record_insert("b", 0, 2, 1, 200);
        assert_eq!(policy.candidate(300), None);
    }

    #[test]
    fn test_longest_idle_entry_past_limit_is_victim() {
        let mut policy = IdlePolicy::new(LIMIT);
        policy.record_insert("a", 0, 1, 1, 100);
        policy.record_insert("b", 0, 2, 1, 200);
        // At t=1500, "a" has been idle 1400ns (> limit).
        assert_eq!(policy.candidate(1_500), Some(("a", 1)));
    }

    #[test]
    fn test_access_rescues_an_entry() {
        let mut policy = IdlePolicy::new(LIMIT);
        policy.record_insert("a", 0, 1, 1, 100);
        policy.record_insert("b", 0, 2, 1, 150);
        policy.record_access(&"a", 1_400);
        // Now "b" is the longest idle (since 150) and past the limit.
        assert_eq!(policy.candidate(1_500), Some(("b", 2)));
        // "a" itself is fresh again.
        assert_eq!(policy.record_remove(&"b", 2), Some(1));
        assert_eq!(policy.candidate(1_500), None);
    }

    #[test]
    fn test_version_checked_removal() {
        let mut policy = IdlePolicy::new(LIMIT);
        policy.record_insert("a", 0, 1, 1, 0);
        assert_eq!(policy.record_remove(&"a", 9), None);
        assert_eq!(policy.len(), 1);
    }
}
