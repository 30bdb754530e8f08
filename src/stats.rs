//! Cache Statistics Counters
//!
//! Process-global (per cache instance) operation counters: hits, misses,
//! loads, load failures, accumulated load time and evictions. Counters are
//! atomic adders updated on the hot path and are strictly monotonic; they
//! are never decremented and can only be discarded by dropping the cache.
//!
//! Recording can be disabled per cache (`record_stats(false)`), in which case
//! every record call is a cheap no-op and the snapshot stays at zero.
//!
//! Snapshots are taken with [`CacheStats::snapshot`] and reported either
//! through the typed [`StatsSnapshot`] accessors or as a deterministic
//! `BTreeMap` (ordered keys, stable across runs) for logging and comparison
//! harnesses.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic operation counters for one cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    load_time_total_ns: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Creates a counter set; when `enabled` is false all recording is a no-op.
    pub(crate) fn new(enabled: bool) -> Self {
        CacheStats {
            enabled,
            ..CacheStats::default()
        }
    }

    /// Records a read that found a live entry.
    #[inline]
    pub(crate) fn record_hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a read that found nothing (or only an expired entry).
    #[inline]
    pub(crate) fn record_miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a completed loader invocation and its duration.
    #[inline]
    pub(crate) fn record_load(&self, elapsed_ns: u64) {
        if self.enabled {
            self.loads.fetch_add(1, Ordering::Relaxed);
            self.load_time_total_ns
                .fetch_add(elapsed_ns, Ordering::Relaxed);
        }
    }

    /// Records a failed loader invocation and its duration.
    #[inline]
    pub(crate) fn record_load_failure(&self, elapsed_ns: u64) {
        if self.enabled {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
            self.load_time_total_ns
                .fetch_add(elapsed_ns, Ordering::Relaxed);
        }
    }

    /// Records a capacity- or weight-driven eviction.
    #[inline]
    pub(crate) fn record_eviction(&self) {
        if self.enabled {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Takes a point-in-time snapshot; `size` is the current entry count.
    pub(crate) fn snapshot(&self, size: u64) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            load_time_total_ns: self.load_time_total_ns.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
        }
    }
}

/// Read-only view of the counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Completed loader invocations.
    pub loads: u64,
    /// Failed loader invocations.
    pub load_failures: u64,
    /// Total nanoseconds spent in the loader (successes and failures).
    pub load_time_total_ns: u64,
    /// Entries removed due to size or weight pressure.
    pub evictions: u64,
    /// Entry count at snapshot time.
    pub size: u64,
}

impl StatsSnapshot {
    /// Total number of reads.
    #[inline]
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of reads served from the cache, in `0.0..=1.0`.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests();
        if requests > 0 {
            self.hits as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Fraction of reads that missed, in `0.0..=1.0`.
    pub fn miss_rate(&self) -> f64 {
        let requests = self.requests();
        if requests > 0 {
            self.misses as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Mean loader duration in nanoseconds over successes and failures.
    pub fn average_load_time_ns(&self) -> f64 {
        let completed = self.loads + self.load_failures;
        if completed > 0 {
            self.load_time_total_ns as f64 / completed as f64
        } else {
            0.0
        }
    }

    /// Exports the snapshot as key/value pairs in deterministic order.
    ///
    /// A `BTreeMap` keeps metric ordering stable, which matters for
    /// reproducible logs and test output.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("average_load_time_ns".to_owned(), self.average_load_time_ns());
        metrics.insert("evictions".to_owned(), self.evictions as f64);
        metrics.insert("hit_rate".to_owned(), self.hit_rate());
        metrics.insert("hits".to_owned(), self.hits as f64);
        metrics.insert("load_failures".to_owned(), self.load_failures as f64);
        metrics.insert("load_time_total_ns".to_owned(), self.load_time_total_ns as f64);
        metrics.insert("loads".to_owned(), self.loads as f64);
        metrics.insert("miss_rate".to_owned(), self.miss_rate());
        metrics.insert("misses".to_owned(), self.misses as f64);
        metrics.insert("requests".to_owned(), self.requests() as f64);
        metrics.insert("size".to_owned(), self.size as f64);
        metrics
    }
}
