//! W-TinyLFU Eviction
//!
//! The default high-performance policy. The cache is split into a small
//! *window* (about 1% of capacity, plain LRU) and a *main* region (about 99%,
//! segmented LRU with probationary and protected queues, 20/80):
//!
//! ```text
//! insert ──▶ [ window LRU ]──full──▶ admission contest ──▶ [ probationary ]
//!                                         ▲    ▲                  │ hit
//!                                    sketch freq                  ▼
//!                                    decides loser          [ protected ]
//! ```
//!
//! New entries always land in the window. When the window overflows and the
//! main region is full, the window's LRU entry competes against the main
//! region's SLRU victim: whichever has the lower sketch frequency is evicted,
//! with ties favoring the incoming (window) entry. A hit in probationary
//! promotes to protected; protected overflow demotes its LRU back to
//! probationary. Window and main are disjoint and every tracked entry is in
//! exactly one segment.
//!
//! Capacity units are entries when the cache is entry-bounded, weight units
//! otherwise, so the same segment arithmetic serves both kinds of bound.

use std::sync::Arc;

use hashbrown::HashMap;

use super::arena::{Node, NodeArena, SlotList};
use crate::sketch::FrequencySketch;

/// Which region a node currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment {
    /// The small LRU buffer that absorbs new insertions.
    Window,
    /// Main-region queue for entries not yet re-accessed.
    Probationary,
    /// Main-region queue for entries with repeated hits.
    Protected,
}

/// W-TinyLFU ordering over policy nodes.
pub(crate) struct TinyLfuPolicy<K> {
    arena: NodeArena<K, Segment>,
    index: HashMap<K, u32>,
    window: SlotList,
    probationary: SlotList,
    protected: SlotList,
    window_units: u64,
    probationary_units: u64,
    protected_units: u64,
    window_limit: u64,
    main_limit: u64,
    protected_limit: u64,
    weigh_by_weight: bool,
    sketch: Option<Arc<FrequencySketch>>,
}

impl<K: core::hash::Hash + Eq + Clone> TinyLfuPolicy<K> {
    /// Creates a policy for `total_units` of capacity.
    ///
    /// `weigh_by_weight` selects whether units are entry counts or weights;
    /// `sketch` is the shared admission filter (absent sketches degrade to
    /// always favoring main-region residents).
    pub(crate) fn new(
        total_units: u64,
        weigh_by_weight: bool,
        sketch: Option<Arc<FrequencySketch>>,
    ) -> Self {
        let total = total_units.max(1);
        let window_limit = (total / 100).max(1);
        let main_limit = total.saturating_sub(window_limit).max(1);
        let protected_limit = (main_limit * 4 / 5).max(1);
        TinyLfuPolicy {
            arena: NodeArena::new(),
            index: HashMap::new(),
            window: SlotList::new(),
            probationary: SlotList::new(),
            protected: SlotList::new(),
            window_units: 0,
            probationary_units: 0,
            protected_units: 0,
            window_limit,
            main_limit,
            protected_limit,
            weigh_by_weight,
            sketch,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.len()
    }

    #[inline]
    fn unit_of(&self, slot: u32) -> u64 {
        if self.weigh_by_weight {
            self.arena.get(slot).weight
        } else {
            1
        }
    }

    pub(crate) fn record_access(&mut self, key: &K) {
        let Some(&slot) = self.index.get(key) else {
            return;
        };
        match self.arena.get(slot).meta {
            Segment::Window => self.window.move_to_front(&mut self.arena, slot),
            Segment::Protected => self.protected.move_to_front(&mut self.arena, slot),
            Segment::Probationary => {
                let unit = self.unit_of(slot);
                self.probationary.unlink(&mut self.arena, slot);
                self.probationary_units -= unit;
                self.arena.get_mut(slot).meta = Segment::Protected;
                self.protected.push_front(&mut self.arena, slot);
                self.protected_units += unit;
                self.shed_protected();
            }
        }
    }

    pub(crate) fn record_insert(&mut self, key: K, hash: u64, version: u64, weight: u64) {
        let slot = self
            .arena
            .insert(Node::new(key.clone(), hash, version, weight, Segment::Window));
        self.index.insert(key, slot);
        self.window.push_front(&mut self.arena, slot);
        let unit = self.unit_of(slot);
        self.window_units += unit;
        self.drain_window();
    }

    /// Overwrite: refresh version/weight, then treat the write as an access.
    pub(crate) fn record_update(&mut self, key: &K, hash: u64, version: u64, weight: u64) {
        match self.index.get(key).copied() {
            Some(slot) => {
                let old_unit = self.unit_of(slot);
                let segment = {
                    let node = self.arena.get_mut(slot);
                    node.version = version;
                    node.weight = weight;
                    node.meta
                };
                let new_unit = self.unit_of(slot);
                match segment {
                    Segment::Window => {
                        self.window_units = self.window_units - old_unit + new_unit;
                    }
                    Segment::Probationary => {
                        self.probationary_units = self.probationary_units - old_unit + new_unit;
                    }
                    Segment::Protected => {
                        self.protected_units = self.protected_units - old_unit + new_unit;
                    }
                }
                self.record_access(key);
                self.drain_window();
            }
            None => self.record_insert(key.clone(), hash, version, weight),
        }
    }

    pub(crate) fn record_remove(&mut self, key: &K, version: u64) -> Option<u64> {
        let &slot = self.index.get(key)?;
        if self.arena.get(slot).version != version {
            return None;
        }
        let unit = self.unit_of(slot);
        match self.arena.get(slot).meta {
            Segment::Window => {
                self.window.unlink(&mut self.arena, slot);
                self.window_units -= unit;
            }
            Segment::Probationary => {
                self.probationary.unlink(&mut self.arena, slot);
                self.probationary_units -= unit;
            }
            Segment::Protected => {
                self.protected.unlink(&mut self.arena, slot);
                self.protected_units -= unit;
            }
        }
        self.index.remove(key);
        let weight = self.arena.remove(slot).weight;
        // Freed main-region room may let the window drain.
        self.drain_window();
        Some(weight)
    }

    /// The admission contest, without mutating anything.
    ///
    /// The window's LRU competes against the main region's SLRU victim; the
    /// one the sketch estimates as less frequent loses. Ties keep the window
    /// (incoming) entry.
    pub(crate) fn candidate(&self) -> Option<(K, u64)> {
        let window_tail = self.window.tail();
        let main_tail = self.probationary.tail().or_else(|| self.protected.tail());
        let loser = match (window_tail, main_tail) {
            (None, None) => return None,
            (Some(w), None) => w,
            (None, Some(m)) => m,
            (Some(w), Some(m)) => match &self.sketch {
                Some(sketch) => {
                    let incoming = sketch.frequency(self.arena.get(w).hash);
                    let resident = sketch.frequency(self.arena.get(m).hash);
                    if incoming >= resident {
                        m
                    } else {
                        w
                    }
                }
                None => m,
            },
        };
        let node = self.arena.get(loser);
        Some((node.key.clone(), node.version))
    }

    pub(crate) fn clear(&mut self) {
        self.arena.clear();
        self.index.clear();
        self.window.reset();
        self.probationary.reset();
        self.protected.reset();
        self.window_units = 0;
        self.probationary_units = 0;
        self.protected_units = 0;
    }

    /// True when `key` is tracked and currently in the window segment.
    #[cfg(test)]
    pub(crate) fn in_window(&self, key: &K) -> Option<bool> {
        self.index
            .get(key)
            .map(|&slot| self.arena.get(slot).meta == Segment::Window)
    }

    /// Moves window overflow into probationary while the main region has room.
    fn drain_window(&mut self) {
        while self.window_units > self.window_limit {
            let Some(slot) = self.window.tail() else {
                break;
            };
            let unit = self.unit_of(slot);
            if self.probationary_units + self.protected_units + unit > self.main_limit {
                break;
            }
            self.window.unlink(&mut self.arena, slot);
            self.window_units -= unit;
            self.arena.get_mut(slot).meta = Segment::Probationary;
            self.probationary.push_front(&mut self.arena, slot);
            self.probationary_units += unit;
        }
    }

    /// Demotes protected overflow back to probationary.
    fn shed_protected(&mut self) {
        while self.protected_units > self.protected_limit {
            let Some(slot) = self.protected.pop_back(&mut self.arena) else {
                break;
            };
            let unit = self.unit_of(slot);
            self.protected_units -= unit;
            self.arena.get_mut(slot).meta = Segment::Probationary;
            self.probationary.push_front(&mut self.arena, slot);
            self.probationary_units += unit;
        }
    }
}

impl<K> std::fmt::Debug for TinyLfuPolicy<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TinyLfuPolicy")
            .field("len", &self.arena.len())
            .field("window_units", &self.window_units)
            .field("window_limit", &self.window_limit)
            .field("probationary_units", &self.probationary_units)
            .field("protected_units", &self.protected_units)
            .field("protected_limit", &self.protected_limit)
            .finish()
    }
}
