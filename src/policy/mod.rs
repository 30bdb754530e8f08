//! Eviction Policy Machinery
//!
//! Policies are tagged variants over a shared arena of per-entry nodes, not a
//! trait-object hierarchy: the facade picks one core at construction time and
//! dispatches through a plain enum. Every core implements the same contract:
//!
//! - `record_access`: after a successful read; updates recency/frequency.
//! - `record_insert` / `record_update`: after a write.
//! - `record_remove`: after any removal, version-checked so a stale decision
//!   never detaches a newer entry's node.
//! - `candidate`: picks a victim without mutating anything.
//!
//! The [`Policy`] wrapper composes the chosen core with the capacity and
//! weight accounting from [`weight`]: the core orders entries, the wrapper
//! decides when that ordering must produce a victim. All bookkeeping runs
//! under one coarse mutex owned by the facade; cores are therefore plain
//! single-threaded structures.

pub(crate) mod arena;
mod fifo;
mod idle;
mod lfu;
mod lru;
mod tinylfu;
pub(crate) mod weight;

use std::sync::Arc;

use crate::config::EvictionStrategy;
use crate::event::RemovalReason;
use crate::sketch::FrequencySketch;

use fifo::{QueueOrder, QueuePolicy};
use idle::IdlePolicy;
use lfu::LfuPolicy;
use lru::LruPolicy;
use tinylfu::TinyLfuPolicy;
use weight::{CapacityBounds, UsageTracker};

/// Window sizing fallback for a W-TinyLFU policy built without bounds; the
/// builder validates against this case, so it only guards internal misuse.
const UNBOUNDED_TINYLFU_UNITS: u64 = 1024;

/// A victim chosen by a policy: the key, the entry version the policy
/// observed, and the reason the eviction will be reported with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VictimRef<K> {
    pub key: K,
    pub version: u64,
    pub reason: RemovalReason,
}

#[derive(Debug)]
enum PolicyCore<K> {
    Lru(LruPolicy<K>),
    Lfu(LfuPolicy<K>),
    Queue(QueuePolicy<K>),
    Idle(IdlePolicy<K>),
    TinyLfu(TinyLfuPolicy<K>),
}

/// The facade-facing policy: a core ordering plus capacity accounting.
#[derive(Debug)]
pub(crate) struct Policy<K> {
    core: PolicyCore<K>,
    usage: UsageTracker,
    bounds: CapacityBounds,
}

impl<K: core::hash::Hash + Eq + Clone> Policy<K> {
    /// Builds the policy selected by `strategy` under the given bounds.
    pub(crate) fn new(
        strategy: &EvictionStrategy,
        bounds: CapacityBounds,
        sketch: Option<Arc<FrequencySketch>>,
    ) -> Self {
        let core = match strategy {
            EvictionStrategy::Lru => PolicyCore::Lru(LruPolicy::new()),
            EvictionStrategy::Lfu => PolicyCore::Lfu(LfuPolicy::new()),
            EvictionStrategy::Fifo => PolicyCore::Queue(QueuePolicy::new(QueueOrder::EvictOldest)),
            EvictionStrategy::Filo => PolicyCore::Queue(QueuePolicy::new(QueueOrder::EvictNewest)),
            EvictionStrategy::IdleTime { idle_limit } => {
                PolicyCore::Idle(IdlePolicy::new(idle_limit.as_nanos() as u64))
            }
            EvictionStrategy::TinyLfu => {
                let total = bounds.total_units().unwrap_or(UNBOUNDED_TINYLFU_UNITS);
                let weigh_by_weight = bounds.max_entries.is_none() && bounds.max_weight.is_some();
                PolicyCore::TinyLfu(TinyLfuPolicy::new(total, weigh_by_weight, sketch))
            }
        };
        Policy {
            core,
            usage: UsageTracker::default(),
            bounds,
        }
    }

    /// Number of entries the policy is tracking.
    pub(crate) fn len(&self) -> usize {
        match &self.core {
            PolicyCore::Lru(p) => p.len(),
            PolicyCore::Lfu(p) => p.len(),
            PolicyCore::Queue(p) => p.len(),
            PolicyCore::Idle(p) => p.len(),
            PolicyCore::TinyLfu(p) => p.len(),
        }
    }

    /// Records a successful read.
    pub(crate) fn on_access(&mut self, key: &K, now_ns: u64) {
        match &mut self.core {
            PolicyCore::Lru(p) => p.record_access(key),
            PolicyCore::Lfu(p) => p.record_access(key),
            PolicyCore::Queue(p) => p.record_access(key),
            PolicyCore::Idle(p) => p.record_access(key, now_ns),
            PolicyCore::TinyLfu(p) => p.record_access(key),
        }
    }

    /// Records a freshly inserted entry.
    pub(crate) fn on_insert(&mut self, key: K, hash: u64, version: u64, weight: u64, now_ns: u64) {
        match &mut self.core {
            PolicyCore::Lru(p) => p.record_insert(key, hash, version, weight),
            PolicyCore::Lfu(p) => p.record_insert(key, hash, version, weight),
            PolicyCore::Queue(p) => p.record_insert(key, hash, version, weight),
            PolicyCore::Idle(p) => p.record_insert(key, hash, version, weight, now_ns),
            PolicyCore::TinyLfu(p) => p.record_insert(key, hash, version, weight),
        }
        self.usage.add(weight);
    }

    /// Records an overwrite of an existing entry.
    pub(crate) fn on_update(
        &mut self,
        key: &K,
        hash: u64,
        version: u64,
        old_weight: u64,
        new_weight: u64,
        now_ns: u64,
    ) {
        match &mut self.core {
            PolicyCore::Lru(p) => p.record_update(key, hash, version, new_weight),
            PolicyCore::Lfu(p) => p.record_update(key, hash, version, new_weight),
            PolicyCore::Queue(p) => p.record_update(key, hash, version, new_weight),
            PolicyCore::Idle(p) => p.record_update(key, hash, version, new_weight, now_ns),
            PolicyCore::TinyLfu(p) => p.record_update(key, hash, version, new_weight),
        }
        self.usage.replace(old_weight, new_weight);
    }

    /// Records a removal. Returns `true` when the policy actually released a
    /// node (the recorded version matched).
    pub(crate) fn on_remove(&mut self, key: &K, version: u64) -> bool {
        let released = match &mut self.core {
            PolicyCore::Lru(p) => p.record_remove(key, version),
            PolicyCore::Lfu(p) => p.record_remove(key, version),
            PolicyCore::Queue(p) => p.record_remove(key, version),
            PolicyCore::Idle(p) => p.record_remove(key, version),
            PolicyCore::TinyLfu(p) => p.record_remove(key, version),
        };
        match released {
            Some(weight) => {
                self.usage.remove(weight);
                true
            }
            None => false,
        }
    }

    /// True when a configured bound is currently violated.
    pub(crate) fn over_bound(&self) -> bool {
        self.violation().is_some()
    }

    /// The reason a bound is currently violated, if one is.
    pub(crate) fn violation(&self) -> Option<RemovalReason> {
        self.bounds.violation(&self.usage)
    }

    /// Picks a victim if a bound is violated. Does not mutate policy state;
    /// the facade applies the eviction and reports it back via `on_remove`.
    pub(crate) fn next_victim(&self, now_ns: u64) -> Option<VictimRef<K>> {
        let reason = self.bounds.violation(&self.usage)?;
        let (key, version) = match &self.core {
            PolicyCore::Lru(p) => p.candidate(),
            PolicyCore::Lfu(p) => p.candidate(),
            PolicyCore::Queue(p) => p.candidate(),
            PolicyCore::Idle(p) => p.candidate(now_ns),
            PolicyCore::TinyLfu(p) => p.candidate(),
        }?;
        Some(VictimRef {
            key,
            version,
            reason,
        })
    }

    /// Drops all nodes and accounting.
    pub(crate) fn clear(&mut self) {
        match &mut self.core {
            PolicyCore::Lru(p) => p.clear(),
            PolicyCore::Lfu(p) => p.clear(),
            PolicyCore::Queue(p) => p.clear(),
            PolicyCore::Idle(p) => p.clear(),
            PolicyCore::TinyLfu(p) => p.clear(),
        }
        self.usage.reset();
    }

    /// Current usage totals (entries and summed weight).
    #[cfg(test)]
    pub(crate) fn usage(&self) -> UsageTracker {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RemovalReason;

    fn bounded(max_entries: u64) -> Policy<&'static str> {
        Policy::new(
            &EvictionStrategy::Lru,
            CapacityBounds::new(Some(max_entries), None),
            None,
        )
    }

    #[test]
    fn test_no_victim_under_bound() {
        let mut policy = bounded(2);
        policy.on_insert("a", 0, 1, 1, 0);
        policy.on_insert("b", 0, 2, 1, 0);
        assert!(!policy.over_bound());
        assert_eq!(policy.next_victim(0), None);
    }

    #[test]
    fn test_victim_offered_when_over_bound() {
        let mut policy = bounded(2);
        policy.on_insert("a", 0, 1, 1, 0);
        policy.on_insert("b", 0, 2, 1, 0);
        policy.on_insert("c", 0, 3, 1, 0);
        assert!(policy.over_bound());
        let victim = policy.next_victim(0).unwrap();
        assert_eq!(victim.key, "a");
        assert_eq!(victim.version, 1);
        assert_eq!(victim.reason, RemovalReason::Size);

        assert!(policy.on_remove(&victim.key, victim.version));
        assert!(!policy.over_bound());
    }

    #[test]
    fn test_weight_bound_reports_weight_reason() {
        let mut policy: Policy<&str> = Policy::new(
            &EvictionStrategy::Lru,
            CapacityBounds::new(None, Some(10)),
            None,
        );
        policy.on_insert("a", 0, 1, 4, 0);
        policy.on_insert("b", 0, 2, 4, 0);
        policy.on_insert("c", 0, 3, 4, 0);
        let victim = policy.next_victim(0).unwrap();
        assert_eq!(victim.reason, RemovalReason::Weight);
    }

    #[test]
    fn test_update_changes_weight_accounting() {
        let mut policy: Policy<&str> = Policy::new(
            &EvictionStrategy::Lru,
            CapacityBounds::new(None, Some(10)),
            None,
        );
        policy.on_insert("a", 0, 1, 4, 0);
        policy.on_update(&"a", 0, 2, 4, 9, 0);
        assert_eq!(policy.usage().weight, 9);
        assert_eq!(policy.usage().entries, 1);
        assert!(!policy.over_bound());
        policy.on_update(&"a", 0, 3, 9, 11, 0);
        assert!(policy.over_bound());
    }

    #[test]
    fn test_stale_remove_leaves_usage_untouched() {
        let mut policy = bounded(2);
        policy.on_insert("a", 0, 5, 1, 0);
        assert!(!policy.on_remove(&"a", 4));
        assert_eq!(policy.usage().entries, 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut policy = bounded(1);
        policy.on_insert("a", 0, 1, 1, 0);
        policy.on_insert("b", 0, 2, 1, 0);
        policy.clear();
        assert_eq!(policy.len(), 0);
        assert!(!policy.over_bound());
        assert_eq!(policy.next_victim(0), None);
    }
}
