//! Least Recently Used (LRU) Eviction
//!
//! The classic recency ordering: a single list over policy nodes, most
//! recently touched at the front, victim taken from the back.
//!
//! ```text
//! front (MRU) ◀──▶ ... ◀──▶ back (LRU = next victim)
//! ```
//!
//! All operations are O(1): a hash index maps keys to arena slots, and the
//! list is relinked in place. Writes count as accesses, so an overwritten
//! entry moves to the MRU position just like a read one.

use hashbrown::HashMap;

use super::arena::{Node, NodeArena, SlotList};

/// LRU ordering over policy nodes.
#[derive(Debug)]
pub(crate) struct LruPolicy<K> {
    arena: NodeArena<K, ()>,
    index: HashMap<K, u32>,
    list: SlotList,
}

impl<K: core::hash::Hash + Eq + Clone> LruPolicy<K> {
    pub(crate) fn new() -> Self {
        LruPolicy {
            arena: NodeArena::new(),
            index: HashMap::new(),
            list: SlotList::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }

    pub(crate) fn record_access(&mut self, key: &K) {
        if let Some(&slot) = self.index.get(key) {
            self.list.move_to_front(&mut self.arena, slot);
        }
    }

    pub(crate) fn record_insert(&mut self, key: K, hash: u64, version: u64, weight: u64) {
        let slot = self
            .arena
            .insert(Node::new(key.clone(), hash, version, weight, ()));
        self.index.insert(key, slot);
        self.list.push_front(&mut self.arena, slot);
    }

    /// Overwrite: refresh version/weight and treat the write as an access.
    pub(crate) fn record_update(&mut self, key: &K, hash: u64, version: u64, weight: u64) {
        match self.index.get(key) {
            Some(&slot) => {
                let node = self.arena.get_mut(slot);
                node.version = version;
                node.weight = weight;
                self.list.move_to_front(&mut self.arena, slot);
            }
            None => self.record_insert(key.clone(), hash, version, weight),
        }
    }

    /// Removes the node for `key` if its recorded version matches.
    /// Returns the node's weight when it was removed.
    pub(crate) fn record_remove(&mut self, key: &K, version: u64) -> Option<u64> {
        let &slot = self.index.get(key)?;
        if self.arena.get(slot).version != version {
            return None;
        }
        self.index.remove(key);
        self.list.unlink(&mut self.arena, slot);
        Some(self.arena.remove(slot).weight)
    }

    /// The LRU end, untouched.
    pub(crate) fn candidate(&self) -> Option<(K, u64)> {
        self.list.tail().map(|slot| {
            let node = self.arena.get(slot);
            (node.key.clone(), node.version)
        })
    }

    pub(crate) fn clear(&mut self) {
        self.arena.clear();
        self.index.clear();
        self.list.reset();
    }
}
