//! Unified Cache Entry Type
//!
//! This module provides the [`CacheEntry`] structure stored in the entry
//! store. The entry is the unit of storage: it holds the value, the entry's
//! weight, its monotonic timestamps, an access counter and a version number.
//!
//! # Design Notes
//!
//! - **Versioning**: every entry carries a version drawn from a per-cache
//!   monotonic counter. Replacement is an atomic (remove-old, insert-new) with
//!   `old.version < new.version`. Eviction and refresh decisions record the
//!   version they observed and are abandoned when it no longer matches, so a
//!   stale decision can never remove a newer entry.
//! - **Timestamps**: `write_ns` is fixed at insert/replace time;
//!   `access_ns` is an atomic updated on reads while only the shard read lock
//!   is held. The invariant `write_ns <= access_ns` holds because both start
//!   equal and `access_ns` only moves forward on a monotonic clock.
//! - **Access counter**: 32-bit saturating. Once it exceeds a small promotion
//!   threshold the entry is considered *hot*; policies may use this as a cheap
//!   popularity signal without consulting the frequency sketch.
//!
//! # Memory Layout
//!
//! Per entry, beyond the user's value: `weight` (8B), `write_ns` (8B),
//! `access_ns` (8B), `access_count` (4B) and `version` (8B). The key is held
//! by the owning hash map, not duplicated here.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Accesses beyond this count mark an entry as hot.
const HOT_PROMOTION_THRESHOLD: u32 = 3;

/// A versioned, weighted cache entry.
///
/// Stored by value inside the entry store's shard maps. The key lives in the
/// map; the entry holds everything else the cache needs to know about one
/// key/value binding.
pub struct CacheEntry<V> {
    /// The cached value. Opaque to the cache core.
    value: V,
    /// Cost of this entry in abstract weight units (1 unless a weigher is
    /// configured).
    weight: u64,
    /// Monotonic tick of the write that produced this entry.
    write_ns: u64,
    /// Monotonic tick of the last access (reads and writes).
    access_ns: AtomicU64,
    /// Saturating access counter.
    access_count: AtomicU32,
    /// Per-cache monotonically increasing sequence number.
    version: u64,
}

impl<V> CacheEntry<V> {
    /// Creates an entry written at `now_ns` with the given weight and version.
    #[inline]
    pub(crate) fn new(value: V, weight: u64, now_ns: u64, version: u64) -> Self {
        CacheEntry {
            value,
            weight,
            write_ns: now_ns,
            access_ns: AtomicU64::new(now_ns),
            access_count: AtomicU32::new(0),
            version,
        }
    }

    /// Borrows the cached value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry, returning the value.
    #[inline]
    pub(crate) fn into_value(self) -> V {
        self.value
    }

    /// Weight of this entry in abstract units.
    #[inline]
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Monotonic tick of the last write.
    #[inline]
    pub fn write_ns(&self) -> u64 {
        self.write_ns
    }

    /// Monotonic tick of the last access (read or write).
    #[inline]
    pub fn access_ns(&self) -> u64 {
        self.access_ns.load(Ordering::Relaxed)
    }

    /// Number of accesses recorded against this entry, saturating.
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// True once the access counter has exceeded the promotion threshold.
    #[inline]
    pub fn is_hot(&self) -> bool {
        self.access_count() > HOT_PROMOTION_THRESHOLD
    }

    /// This entry's version.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Records an access at `now_ns`.
    ///
    /// Only touches atomic fields, so it is safe to call while holding a
    /// shard read lock. `access_ns` never moves backwards.
    #[inline]
    pub(crate) fn touch(&self, now_ns: u64) {
        self.access_ns.fetch_max(now_ns, Ordering::Relaxed);
        let _ = self
            .access_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c == u32::MAX {
                    None
                } else {
                    Some(c + 1)
                }
            });
    }

    /// Nanoseconds this entry has gone without an access, as of `now_ns`.
    #[inline]
    pub fn idle_nanos(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.access_ns())
    }

    /// Nanoseconds since this entry was written, as of `now_ns`.
    #[inline]
    pub fn age_nanos(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.write_ns)
    }
}

impl<V: Clone> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        CacheEntry {
            value: self.value.clone(),
            weight: self.weight,
            write_ns: self.write_ns,
            access_ns: AtomicU64::new(self.access_ns()),
            access_count: AtomicU32::new(self.access_count()),
            version: self.version,
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("value", &self.value)
            .field("weight", &self.weight)
            .field("write_ns", &self.write_ns)
            .field("access_ns", &self.access_ns())
            .field("access_count", &self.access_count())
            .field("version", &self.version)
            .finish()
    }
}
