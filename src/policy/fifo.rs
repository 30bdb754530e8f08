//! FIFO and FILO Eviction
//!
//! A single queue ordered by insertion. Accesses do not reorder anything and
//! overwrites keep the original queue position, so the ordering is purely the
//! monotonic insertion sequence.
//!
//! - **FIFO** evicts the oldest insertion (queue back).
//! - **FILO** evicts the newest insertion (queue front).

use hashbrown::HashMap;

use super::arena::{Node, NodeArena, SlotList};

/// Which end of the insertion queue is sacrificed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueOrder {
    /// Evict the oldest entry.
    EvictOldest,
    /// Evict the newest entry.
    EvictNewest,
}

/// Insertion-ordered eviction, shared by FIFO and FILO.
#[derive(Debug)]
pub(crate) struct QueuePolicy<K> {
    arena: NodeArena<K, ()>,
    index: HashMap<K, u32>,
    queue: SlotList,
    order: QueueOrder,
}

impl<K: core::hash::Hash + Eq + Clone> QueuePolicy<K> {
    pub(crate) fn new(order: QueueOrder) -> Self {
        QueuePolicy {
            arena: NodeArena::new(),
            index: HashMap::new(),
            queue: SlotList::new(),
            order,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }

    /// Accesses never reorder an insertion queue.
    pub(crate) fn record_access(&mut self, _key: &K) {}

    pub(crate) fn record_insert(&mut self, key: K, hash: u64, version: u64, weight: u64) {
        let slot = self
            .arena
            .insert(Node::new(key.clone(), hash, version, weight, ()));
        self.index.insert(key, slot);
        self.queue.push_front(&mut self.arena, slot);
    }

    /// Overwrite keeps the original insertion position.
    pub(crate) fn record_update(&mut self, key: &K, hash: u64, version: u64, weight: u64) {
        match self.index.get(key) {
            Some(&slot) => {
                let node = self.arena.get_mut(slot);
                node.version = version;
                node.weight = weight;
            }
            None => self.record_insert(key.clone(), hash, version, weight),
        }
    }

    pub(crate) fn record_remove(&mut self, key: &K, version: u64) -> Option<u64> {
        let &slot = self.index.get(key)?;
        if self.arena.get(slot).version != version {
            return None;
        }
        self.index.remove(key);
        self.queue.unlink(&mut self.arena, slot);
        Some(self.arena.remove(slot).weight)
    }

    pub(crate) fn candidate(&self) -> Option<(K, u64)> {
        let slot = match self.order {
            QueueOrder::EvictOldest => self.queue.tail(),
            QueueOrder::EvictNewest => self.queue.head(),
        }?;
        let node = self.arena.get(slot);
        Some((node.key.clone(), node.version))
    }

    pub(crate) fn clear(&mut self) {
        self.arena.clear();
        self.index.clear();
        self.queue.reset();
    }
}
