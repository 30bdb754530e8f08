//! Sharded Entry Store
//!
//! The concurrent map backing all cache variants. Keys are partitioned across
//! N shards (N is a power of two), each an independent hash map behind its
//! own read/write lock:
//!
//! ```text
//! spread(hash(key)) & mask ──▶ shard selection
//!
//! ┌──────────────┐ ┌──────────────┐     ┌──────────────┐
//! │   Shard 0    │ │   Shard 1    │ ... │  Shard N-1   │
//! │  [RwLock]    │ │  [RwLock]    │     │  [RwLock]    │
//! │  HashMap     │ │  HashMap     │     │  HashMap     │
//! └──────────────┘ └──────────────┘     └──────────────┘
//! ```
//!
//! Readers take the shard's shared lock, writers the exclusive one; there is
//! no global lock on the hot path. The shard index is derived from a spread
//! of the key hash so it stays decorrelated from the bucket index the map
//! itself computes from the same hash.
//!
//! Cross-shard operations (`len`, `clear`, snapshots, sweeps) visit shards in
//! ascending shard-id order and never hold two shard locks at once, so they
//! cannot deadlock against each other or against single-key operations.
//!
//! Removal is version-checked: [`Store::remove_if_version`] distinguishes a
//! successful removal from a version mismatch (the entry was replaced since
//! the decision was made) and from plain absence, which is what lets eviction
//! decisions be abandoned safely.

use core::hash::{BuildHasher, Hash};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::entry::CacheEntry;

/// Outcome of a version-checked removal.
#[derive(Debug)]
pub(crate) enum RemoveOutcome<V> {
    /// The entry was present at the expected version and has been removed.
    Removed(CacheEntry<V>),
    /// The key is present but at a newer version; nothing was removed.
    VersionMismatch,
    /// The key is not present at all.
    Absent,
}

/// Sharded concurrent key → entry map.
#[derive(Debug)]
pub(crate) struct Store<K, V, S> {
    shards: Box<[RwLock<HashMap<K, CacheEntry<V>, S>>]>,
    mask: usize,
}

impl<K, V, S> Store<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    /// Creates a store with `shard_count` shards (must be a power of two),
    /// pre-sizing each shard's map from the total capacity hint.
    pub(crate) fn new(shard_count: usize, initial_capacity: usize, hasher: S) -> Self {
        debug_assert!(shard_count.is_power_of_two());
        let per_shard = initial_capacity / shard_count;
        let shards: Vec<_> = (0..shard_count)
            .map(|_| RwLock::new(HashMap::with_capacity_and_hasher(per_shard, hasher.clone())))
            .collect();
        Store {
            shards: shards.into_boxed_slice(),
            mask: shard_count - 1,
        }
    }

    /// Number of shards.
    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Finalizing mix over the key hash; decorrelates the shard index from
    /// the map's own bucket index.
    #[inline]
    fn spread(hash: u64) -> u64 {
        let mut h = hash;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h
    }

    #[inline]
    fn shard(&self, hash: u64) -> &RwLock<HashMap<K, CacheEntry<V>, S>> {
        &self.shards[(Self::spread(hash) as usize) & self.mask]
    }

    /// Runs `f` against the entry for `key` under the shard read lock.
    ///
    /// The closure may touch the entry's atomic fields (access time, access
    /// count) but cannot restructure the map.
    pub(crate) fn read<R>(&self, hash: u64, key: &K, f: impl FnOnce(&CacheEntry<V>) -> R) -> Option<R> {
        let shard = self.shard(hash).read();
        shard.get(key).map(f)
    }

    /// Inserts or replaces the entry for `key`, returning the previous one.
    pub(crate) fn insert(&self, hash: u64, key: K, entry: CacheEntry<V>) -> Option<CacheEntry<V>> {
        let mut shard = self.shard(hash).write();
        shard.insert(key, entry)
    }

    /// Removes the entry for `key` unconditionally.
    pub(crate) fn remove(&self, hash: u64, key: &K) -> Option<CacheEntry<V>> {
        let mut shard = self.shard(hash).write();
        shard.remove(key)
    }

    /// Removes the entry for `key` only if it is still at `version`.
    pub(crate) fn remove_if_version(&self, hash: u64, key: &K, version: u64) -> RemoveOutcome<V> {
        let mut shard = self.shard(hash).write();
        match shard.get(key) {
            Some(entry) if entry.version() == version => match shard.remove(key) {
                Some(entry) => RemoveOutcome::Removed(entry),
                None => RemoveOutcome::Absent,
            },
            Some(_) => RemoveOutcome::VersionMismatch,
            None => RemoveOutcome::Absent,
        }
    }

    /// Replaces the entry for `key` with `entry`, but only if the current
    /// entry is still at `expected_version`, returning the replaced entry.
    /// Used by refresh completion so a reload can never clobber a newer user
    /// write.
    pub(crate) fn replace_if_version(
        &self,
        hash: u64,
        key: &K,
        expected_version: u64,
        entry: CacheEntry<V>,
    ) -> Option<CacheEntry<V>> {
        let mut shard = self.shard(hash).write();
        match shard.get_mut(key) {
            Some(current) if current.version() == expected_version => {
                Some(std::mem::replace(current, entry))
            }
            _ => None,
        }
    }

    /// Total entry count, summed shard by shard in id order.
    ///
    /// Weakly consistent: concurrent writers may change shards already
    /// counted.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Drains every shard in id order, returning how many entries were
    /// removed.
    pub(crate) fn clear(&self) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            removed += shard.len();
            shard.clear();
        }
        removed
    }

    /// Collects a weakly consistent snapshot, applying `f` to every entry in
    /// shard-id order and keeping the `Some` results.
    pub(crate) fn snapshot<R>(&self, mut f: impl FnMut(&K, &CacheEntry<V>) -> Option<R>) -> Vec<R> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.read();
            for (key, entry) in shard.iter() {
                if let Some(item) = f(key, entry) {
                    out.push(item);
                }
            }
        }
        out
    }

    /// Returns any present entry's key and version, scanning shards in id
    /// order. Fallback victim selection when the policy offers no candidate
    /// but a bound is violated.
    pub(crate) fn any_entry(&self) -> Option<(K, u64)>
    where
        K: Clone,
    {
        for shard in self.shards.iter() {
            let shard = shard.read();
            if let Some((key, entry)) = shard.iter().next() {
                return Some((key.clone(), entry.version()));
            }
        }
        None
    }

    /// Scans `shard_span` shards starting at `first_shard` (wrapping) and
    /// collects up to `limit` entries matching `expired`, as key/version
    /// pairs. Removal happens separately, version-checked, so a concurrent
    /// overwrite between scan and removal is harmless.
    pub(crate) fn collect_expired(
        &self,
        first_shard: usize,
        shard_span: usize,
        limit: usize,
        mut expired: impl FnMut(&CacheEntry<V>) -> bool,
    ) -> Vec<(K, u64)>
    where
        K: Clone,
    {
        let mut out = Vec::new();
        let count = self.shards.len();
        for offset in 0..shard_span.min(count) {
            if out.len() >= limit {
                break;
            }
            let shard = self.shards[(first_shard + offset) % count].read();
            for (key, entry) in shard.iter() {
                if out.len() >= limit {
                    break;
                }
                if expired(entry) {
                    out.push((key.clone(), entry.version()));
                }
            }
        }
        out
    }
}
