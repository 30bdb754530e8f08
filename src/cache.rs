//! Cache Facade
//!
//! [`Cache`] is the public operation surface. At construction it composes the
//! pieces the configuration asks for (sharded store, eviction policy,
//! frequency sketch, expiration settings, loaders, write buffer, listeners)
//! and every operation then flows through the same skeleton:
//!
//! ```text
//! get ──▶ write buffer (read-your-writes) ──▶ store lookup
//!              │                                  │ hit: touch, policy,
//!              │ pending value                    │      sketch, stats
//!              ▼                                  ▼ miss: loader under
//!           return                                       single-flight
//! ```
//!
//! Writes update the store, then the policy, then run the eviction loop:
//! while a bound is violated the policy names a victim, the store removes it
//! *only* if the victim's version still matches, and the departure is
//! published as an event. A victim whose version moved on is abandoned: a
//! concurrent overwrite has already made the decision stale.
//!
//! Handles are cheap clones sharing one inner cache. Background maintenance
//! (expiration sweep, buffer drain, refresh execution) runs on a per-cache
//! housekeeper thread when enabled, and can always be driven manually with
//! [`Cache::run_pending_tasks`].
//!
//! # Async
//!
//! The `*_async` variants suspend only while awaiting a loader; plain reads
//! and writes never suspend. The cache owns no runtime; async loads run on
//! the caller's executor, and an async caller that cancels simply drops out
//! of its single-flight group.

use core::hash::{BuildHasher, Hash};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::{DefaultHashBuilder, HashSet};
use parking_lot::Mutex;

use crate::buffer::{BufferedRead, PendingOp, WriteBuffer};
use crate::clock::CacheClock;
use crate::config::{CacheBuilder, Weigher, WriteMode};
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::event::{in_dispatch, CacheEvent, ListenerSet, RemovalReason};
use crate::expiry::ExpirySettings;
use crate::housekeeper::Housekeeper;
use crate::loader::{
    AsyncLoader, FlightTable, JoinAsync, JoinSync, LeaderGuard, LoadOutcome, SyncLoader,
};
use crate::policy::weight::CapacityBounds;
use crate::policy::{Policy, VictimRef};
use crate::sketch::FrequencySketch;
use crate::stats::{CacheStats, StatsSnapshot};
use crate::store::{RemoveOutcome, Store};

/// Upper bound on entries removed by one background expiration sweep.
const SWEEP_LIMIT: usize = 512;

/// How a successful write is reported on the event bus.
enum WriteKind {
    Put,
    Load,
}

/// A concurrent, policy-driven in-process cache.
///
/// Cloning the handle is cheap; all clones operate on the same cache. See
/// the crate-level documentation for configuration and usage examples.
pub struct Cache<K, V, S = DefaultHashBuilder> {
    inner: Arc<CacheInner<K, V, S>>,
}

impl<K, V, S> Clone for Cache<K, V, S> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> fmt::Debug for Cache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Read-only view of a cache.
///
/// Exposes only the non-mutating surface; the absence of write operations is
/// enforced by the type, not by a runtime flag. Reads still update recency
/// metadata and counters, but never trigger loads.
pub struct ReadOnlyCache<K, V, S = DefaultHashBuilder> {
    inner: Arc<CacheInner<K, V, S>>,
}

impl<K, V, S> Clone for ReadOnlyCache<K, V, S> {
    fn clone(&self) -> Self {
        ReadOnlyCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> fmt::Debug for ReadOnlyCache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyCache").finish_non_exhaustive()
    }
}

struct RefreshQueue<K> {
    queued: HashSet<K>,
    pending: Vec<(K, u64, u64)>,
}

impl<K> RefreshQueue<K> {
    fn new() -> Self {
        RefreshQueue {
            queued: HashSet::new(),
            pending: Vec::new(),
        }
    }
}

struct CacheInner<K, V, S> {
    store: Store<K, V, S>,
    policy: Mutex<Policy<K>>,
    sketch: Option<Arc<FrequencySketch>>,
    stats: CacheStats,
    expiry: ExpirySettings,
    listeners: ListenerSet<K, V>,
    loader: Option<SyncLoader<K, V>>,
    async_loader: Option<AsyncLoader<K, V>>,
    flights: FlightTable<K, V>,
    refresh: Mutex<RefreshQueue<K>>,
    buffer: Option<WriteBuffer<K, V>>,
    weigher: Option<Weigher<K, V>>,
    clock: CacheClock,
    hash_builder: S,
    closed: AtomicBool,
    version_counter: AtomicU64,
    sweep_cursor: AtomicUsize,
    housekeeper: Mutex<Option<Housekeeper>>,
}

/// Shard count: the next power of two at or above the hint (default: four
/// times the available parallelism).
fn shard_count_for(level: Option<usize>) -> usize {
    let hint = level.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4)
            * 4
    });
    hint.next_power_of_two().clamp(1, 256)
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Validates the configuration and builds the cache.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfiguration`] for inconsistent option
    /// combinations; see the option table in the [`config`](crate::config)
    /// module.
    pub fn build(self) -> CacheResult<Cache<K, V>> {
        Cache::from_builder(self)
    }
}

impl<K, V> Cache<K, V, DefaultHashBuilder>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts configuring a cache.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub(crate) fn from_builder(builder: CacheBuilder<K, V>) -> CacheResult<Self> {
        builder.validate()?;
        let CacheBuilder {
            maximum_size,
            maximum_weight,
            weigher,
            expire_after_write,
            expire_after_access,
            refresh_after_write,
            initial_capacity,
            concurrency_level,
            eviction_strategy,
            frequency_sketch,
            record_stats,
            write_mode,
            loader,
            async_loader,
            listeners,
            clock,
            background_maintenance,
            tick_interval,
        } = builder;

        let clock = clock.unwrap_or_default();
        let hash_builder = DefaultHashBuilder::default();
        let shard_count = shard_count_for(concurrency_level);
        let capacity_hint = initial_capacity
            .unwrap_or_else(|| maximum_size.unwrap_or(0).min(1 << 20) as usize);
        let store = Store::new(shard_count, capacity_hint, hash_builder.clone());

        let expected_keys = maximum_size.or(maximum_weight).unwrap_or(1024);
        let sketch = frequency_sketch.build(expected_keys).map(Arc::new);
        let bounds = CapacityBounds::new(maximum_size, maximum_weight);
        let policy = Policy::new(&eviction_strategy, bounds, sketch.clone());

        let buffer = match write_mode {
            WriteMode::Direct => None,
            WriteMode::Buffered {
                high_water,
                batch_size,
            } => Some(WriteBuffer::new(high_water, batch_size)),
        };
        let expiry = ExpirySettings::new(expire_after_write, expire_after_access, refresh_after_write);

        let inner = Arc::new(CacheInner {
            store,
            policy: Mutex::new(policy),
            sketch,
            stats: CacheStats::new(record_stats),
            expiry,
            listeners: ListenerSet::new(listeners),
            loader,
            async_loader,
            flights: FlightTable::new(),
            refresh: Mutex::new(RefreshQueue::new()),
            buffer,
            weigher,
            clock,
            hash_builder,
            closed: AtomicBool::new(false),
            version_counter: AtomicU64::new(0),
            sweep_cursor: AtomicUsize::new(0),
            housekeeper: Mutex::new(None),
        });

        let needs_maintenance =
            inner.expiry.expires() || inner.expiry.refreshes() || inner.buffer.is_some();
        if background_maintenance && needs_maintenance {
            let tick = tick_interval.unwrap_or_else(|| inner.expiry.tick_interval());
            let weak = Arc::downgrade(&inner);
            let housekeeper = Housekeeper::start(
                tick,
                Box::new(move || match weak.upgrade() {
                    Some(inner) => {
                        inner.run_maintenance();
                        true
                    }
                    None => false,
                }),
            );
            *inner.housekeeper.lock() = Some(housekeeper);
        }

        Ok(Cache { inner })
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn guard(&self) -> CacheResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::Shutdown);
        }
        if in_dispatch() {
            return Err(CacheError::OperationUnavailable(
                "cache re-entered from an event listener",
            ));
        }
        Ok(())
    }

    /// Looks up `key`, loading it on a miss when a loader is configured.
    ///
    /// On a hit the entry's recency, the policy and the sketch are updated
    /// and the hit counter incremented; on a miss the miss counter is
    /// incremented and the loader (if any) runs under single-flight. A
    /// loader failure is returned to every caller coalesced into the load
    /// and nothing is cached.
    pub fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.guard()?;
        self.inner.get_blocking(key)
    }

    /// Async variant of [`get`](Self::get); awaits the async loader on a
    /// miss instead of blocking.
    pub async fn get_async(&self, key: &K) -> CacheResult<Option<V>> {
        self.guard()?;
        let inner = &self.inner;
        let hash = inner.hash(key);
        let now = inner.clock.now_nanos();
        if let Some(buffer) = &inner.buffer {
            match buffer.lookup(key) {
                BufferedRead::Value(value) => {
                    inner.stats.record_hit();
                    inner.record_sketch(hash);
                    return Ok(Some(value));
                }
                BufferedRead::Removed | BufferedRead::Cleared => {
                    inner.stats.record_miss();
                    return inner.load_async(key).await;
                }
                BufferedRead::Untracked => {}
            }
        }
        match inner.live_read(key, hash, now) {
            Some(hit) => {
                inner.record_hit(key, hash, now);
                if hit.refresh_due {
                    inner.schedule_refresh(key, hit.version, hash);
                }
                Ok(Some(hit.value))
            }
            None => {
                inner.stats.record_miss();
                inner.load_async(key).await
            }
        }
    }

    /// Writes `value` under `key`.
    ///
    /// Direct mode applies the write synchronously; buffered mode enqueues
    /// it and returns, flushing inline only when the buffer hits its
    /// high-water mark.
    pub fn put(&self, key: K, value: V) -> CacheResult<()> {
        self.guard()?;
        self.inner.put_blocking(key, value);
        Ok(())
    }

    /// Async variant of [`put`](Self::put). Never suspends; provided for
    /// uniform async call sites.
    pub async fn put_async(&self, key: K, value: V) -> CacheResult<()> {
        self.put(key, value)
    }

    /// Removes `key`, returning the value that was observable for it.
    pub fn remove(&self, key: &K) -> CacheResult<Option<V>> {
        self.guard()?;
        Ok(self.inner.remove_blocking(key))
    }

    /// Async variant of [`remove`](Self::remove). Never suspends.
    pub async fn remove_async(&self, key: &K) -> CacheResult<Option<V>> {
        self.remove(key)
    }

    /// Removes every entry, publishing a single `Clear` event.
    pub fn clear(&self) -> CacheResult<()> {
        self.guard()?;
        self.inner.clear_blocking();
        Ok(())
    }

    /// Async variant of [`clear`](Self::clear). Never suspends.
    pub async fn clear_async(&self) -> CacheResult<()> {
        self.clear()
    }

    /// Number of stored entries (weakly consistent; buffered writes count
    /// once drained).
    pub fn size(&self) -> CacheResult<u64> {
        self.guard()?;
        Ok(self.inner.store.len() as u64)
    }

    /// Async variant of [`size`](Self::size). Never suspends.
    pub async fn size_async(&self) -> CacheResult<u64> {
        self.size()
    }

    /// Whether a live (unexpired) value is observable for `key`. Does not
    /// touch recency or counters and never loads.
    pub fn contains(&self, key: &K) -> CacheResult<bool> {
        self.guard()?;
        Ok(self.inner.contains_now(key))
    }

    /// Async variant of [`contains`](Self::contains). Never suspends.
    pub async fn contains_async(&self, key: &K) -> CacheResult<bool> {
        self.contains(key)
    }

    /// Snapshot of the live keys, weakly consistent.
    pub fn keys(&self) -> CacheResult<Vec<K>> {
        self.guard()?;
        let now = self.inner.clock.now_nanos();
        let expiry = self.inner.expiry;
        Ok(self
            .inner
            .store
            .snapshot(|k, e| (!expiry.is_expired(e, now)).then(|| k.clone())))
    }

    /// Snapshot of the live values, weakly consistent.
    pub fn values(&self) -> CacheResult<Vec<V>> {
        self.guard()?;
        let now = self.inner.clock.now_nanos();
        let expiry = self.inner.expiry;
        Ok(self
            .inner
            .store
            .snapshot(|_, e| (!expiry.is_expired(e, now)).then(|| e.value().clone())))
    }

    /// Snapshot of the live key/value pairs, weakly consistent.
    pub fn entries(&self) -> CacheResult<Vec<(K, V)>> {
        self.guard()?;
        let now = self.inner.clock.now_nanos();
        let expiry = self.inner.expiry;
        Ok(self.inner.store.snapshot(|k, e| {
            (!expiry.is_expired(e, now)).then(|| (k.clone(), e.value().clone()))
        }))
    }

    /// Returns the value for `key`, computing and caching it with `compute`
    /// on a miss. Concurrent callers for the same missing key share one
    /// computation.
    pub fn compute_if_absent(
        &self,
        key: &K,
        compute: impl FnOnce(&K) -> Option<V>,
    ) -> CacheResult<Option<V>> {
        self.guard()?;
        let inner = &self.inner;
        let hash = inner.hash(key);
        let now = inner.clock.now_nanos();
        // A buffered remove or clear makes the key observably absent even if
        // the store still holds a stale entry, so only probe the store when
        // the buffer knows nothing.
        let mut probe_store = true;
        if let Some(buffer) = &inner.buffer {
            match buffer.lookup(key) {
                BufferedRead::Value(value) => {
                    inner.stats.record_hit();
                    return Ok(Some(value));
                }
                BufferedRead::Removed | BufferedRead::Cleared => probe_store = false,
                BufferedRead::Untracked => {}
            }
        }
        if probe_store {
            if let Some(hit) = inner.live_read(key, hash, now) {
                inner.record_hit(key, hash, now);
                return Ok(Some(hit.value));
            }
        }
        inner.stats.record_miss();
        match inner.flights.join_sync(key) {
            JoinSync::Wait(gate) => gate.wait(),
            JoinSync::Leader => {
                let leader = LeaderGuard::new(&inner.flights, key.clone());
                let started = inner.clock.now_nanos();
                let outcome: LoadOutcome<V> = Ok(compute(key));
                inner.finish_load(key, started, &outcome);
                leader.complete(outcome.clone());
                outcome
            }
        }
    }

    /// Point-in-time statistics snapshot. Available after shutdown; counters
    /// are monotonic for the cache's lifetime.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(self.inner.store.len() as u64)
    }

    /// Runs one maintenance pass inline: drains buffered writes, sweeps a
    /// bounded batch of expired entries and executes pending refreshes.
    pub fn run_pending_tasks(&self) {
        self.inner.run_maintenance();
    }

    /// Returns a read-only view sharing this cache's contents.
    pub fn read_only(&self) -> ReadOnlyCache<K, V, S> {
        ReadOnlyCache {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Shuts the cache down: drains the write buffer, stops the maintenance
    /// thread and fails every pending load with [`CacheError::Shutdown`].
    /// Idempotent; all subsequent operations return `Err(Shutdown)`.
    pub fn shutdown(&self) -> CacheResult<()> {
        if in_dispatch() {
            return Err(CacheError::OperationUnavailable(
                "cache re-entered from an event listener",
            ));
        }
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.drain_writes();
        let housekeeper = self.inner.housekeeper.lock().take();
        if let Some(mut housekeeper) = housekeeper {
            housekeeper.stop();
        }
        self.inner.flights.abort_all(&CacheError::Shutdown);
        Ok(())
    }
}

impl<K, V, S> ReadOnlyCache<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn guard(&self) -> CacheResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::Shutdown);
        }
        if in_dispatch() {
            return Err(CacheError::OperationUnavailable(
                "cache re-entered from an event listener",
            ));
        }
        Ok(())
    }

    /// Looks up `key` without ever invoking a loader.
    pub fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.guard()?;
        let inner = &self.inner;
        let hash = inner.hash(key);
        let now = inner.clock.now_nanos();
        if let Some(buffer) = &inner.buffer {
            match buffer.lookup(key) {
                BufferedRead::Value(value) => {
                    inner.stats.record_hit();
                    return Ok(Some(value));
                }
                BufferedRead::Removed | BufferedRead::Cleared => {
                    inner.stats.record_miss();
                    return Ok(None);
                }
                BufferedRead::Untracked => {}
            }
        }
        match inner.live_read(key, hash, now) {
            Some(hit) => {
                inner.record_hit(key, hash, now);
                Ok(Some(hit.value))
            }
            None => {
                inner.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// See [`Cache::contains`].
    pub fn contains(&self, key: &K) -> CacheResult<bool> {
        self.guard()?;
        Ok(self.inner.contains_now(key))
    }

    /// See [`Cache::size`].
    pub fn size(&self) -> CacheResult<u64> {
        self.guard()?;
        Ok(self.inner.store.len() as u64)
    }

    /// See [`Cache::stats`].
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(self.inner.store.len() as u64)
    }
}

struct ReadHit<V> {
    value: V,
    version: u64,
    refresh_due: bool,
}

enum Probe<V> {
    Live(ReadHit<V>),
    Expired(u64),
}

impl<K, V, S> CacheInner<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    #[inline]
    fn weigh(&self, key: &K, value: &V) -> u64 {
        match &self.weigher {
            Some(weigher) => weigher(key, value),
            None => 1,
        }
    }

    #[inline]
    fn next_version(&self) -> u64 {
        self.version_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn can_load(&self) -> bool {
        self.loader.is_some() || self.async_loader.is_some()
    }

    #[inline]
    fn record_sketch(&self, hash: u64) {
        if let Some(sketch) = &self.sketch {
            sketch.record(hash);
        }
    }

    /// Hit bookkeeping: counter, policy recency, sketch.
    fn record_hit(&self, key: &K, hash: u64, now: u64) {
        self.stats.record_hit();
        self.policy.lock().on_access(key, now);
        self.record_sketch(hash);
    }

    fn dispatch_with(&self, make: impl FnOnce() -> CacheEvent<K, V>) {
        if !self.listeners.is_empty() {
            self.listeners.dispatch(&make());
        }
    }

    /// Reads `key` from the store, removing it inline when it is expired.
    fn live_read(&self, key: &K, hash: u64, now: u64) -> Option<ReadHit<V>> {
        let probe = self.store.read(hash, key, |entry| {
            if self.expiry.is_expired(entry, now) {
                Probe::Expired(entry.version())
            } else {
                entry.touch(now);
                Probe::Live(ReadHit {
                    value: entry.value().clone(),
                    version: entry.version(),
                    refresh_due: self.can_load() && self.expiry.needs_refresh(entry, now),
                })
            }
        })?;
        match probe {
            Probe::Live(hit) => Some(hit),
            Probe::Expired(version) => {
                self.remove_expired(key, hash, version);
                None
            }
        }
    }

    /// Version-checked inline expiration; the primary expiry mechanism.
    fn remove_expired(&self, key: &K, hash: u64, version: u64) {
        if let RemoveOutcome::Removed(entry) = self.store.remove_if_version(hash, key, version) {
            self.policy.lock().on_remove(key, version);
            self.dispatch_with(|| CacheEvent::Expire {
                key: key.clone(),
                value: entry.into_value(),
            });
        }
    }

    fn get_blocking(&self, key: &K) -> CacheResult<Option<V>> {
        let hash = self.hash(key);
        let now = self.clock.now_nanos();
        if let Some(buffer) = &self.buffer {
            match buffer.lookup(key) {
                BufferedRead::Value(value) => {
                    self.stats.record_hit();
                    self.record_sketch(hash);
                    return Ok(Some(value));
                }
                BufferedRead::Removed | BufferedRead::Cleared => {
                    self.stats.record_miss();
                    return self.load_blocking(key);
                }
                BufferedRead::Untracked => {}
            }
        }
        match self.live_read(key, hash, now) {
            Some(hit) => {
                self.record_hit(key, hash, now);
                if hit.refresh_due {
                    self.schedule_refresh(key, hit.version, hash);
                }
                Ok(Some(hit.value))
            }
            None => {
                self.stats.record_miss();
                self.load_blocking(key)
            }
        }
    }

    /// Miss path for blocking callers: single-flight around the loader.
    fn load_blocking(&self, key: &K) -> CacheResult<Option<V>> {
        if !self.can_load() {
            return Ok(None);
        }
        match self.flights.join_sync(key) {
            JoinSync::Wait(gate) => gate.wait(),
            JoinSync::Leader => {
                let leader = LeaderGuard::new(&self.flights, key.clone());
                let started = self.clock.now_nanos();
                let outcome = self.invoke_loader_blocking(key);
                self.finish_load(key, started, &outcome);
                leader.complete(outcome.clone());
                outcome
            }
        }
    }

    /// Miss path for async callers.
    async fn load_async(&self, key: &K) -> CacheResult<Option<V>> {
        if !self.can_load() {
            return Ok(None);
        }
        match self.flights.join_async(key) {
            JoinAsync::Wait(rx) => rx
                .await
                .unwrap_or_else(|_| Err(CacheError::loader("load interrupted"))),
            JoinAsync::Leader => {
                let leader = LeaderGuard::new(&self.flights, key.clone());
                let started = self.clock.now_nanos();
                let outcome = self.invoke_loader_async(key).await;
                self.finish_load(key, started, &outcome);
                leader.complete(outcome.clone());
                outcome
            }
        }
    }

    /// Runs whichever loader is configured, preferring the sync one on this
    /// path; an async-only loader is driven to completion on this thread.
    fn invoke_loader_blocking(&self, key: &K) -> LoadOutcome<V> {
        if let Some(loader) = &self.loader {
            return loader(key);
        }
        if let Some(async_loader) = &self.async_loader {
            return futures::executor::block_on(async_loader(key));
        }
        Ok(None)
    }

    /// Runs whichever loader is configured, preferring the async one.
    async fn invoke_loader_async(&self, key: &K) -> LoadOutcome<V> {
        if let Some(async_loader) = &self.async_loader {
            return async_loader(key).await;
        }
        if let Some(loader) = &self.loader {
            return loader(key);
        }
        Ok(None)
    }

    /// Load bookkeeping shared by every load path: counters, events, and the
    /// insert of a loaded value.
    fn finish_load(&self, key: &K, started_ns: u64, outcome: &LoadOutcome<V>) {
        let elapsed = self.clock.now_nanos().saturating_sub(started_ns);
        match outcome {
            Ok(Some(value)) => {
                self.stats.record_load(elapsed);
                self.apply_write(key.clone(), value.clone(), WriteKind::Load);
            }
            Ok(None) => {
                self.stats.record_load(elapsed);
            }
            Err(error) => {
                self.stats.record_load_failure(elapsed);
                self.dispatch_with(|| CacheEvent::LoadError {
                    key: key.clone(),
                    error: error.clone(),
                });
            }
        }
    }

    fn put_blocking(&self, key: K, value: V) {
        match &self.buffer {
            Some(buffer) => {
                if buffer.push_put(key, value) {
                    // High-water mark: the producer pays for the flush.
                    self.drain_writes();
                }
            }
            None => self.apply_write(key, value, WriteKind::Put),
        }
    }

    /// The direct write path: store, policy, sketch, events, eviction.
    fn apply_write(&self, key: K, value: V, kind: WriteKind) {
        let hash = self.hash(&key);
        let now = self.clock.now_nanos();
        let weight = self.weigh(&key, &value);
        let version = self.next_version();
        let entry = CacheEntry::new(value.clone(), weight, now, version);
        let old = self.store.insert(hash, key.clone(), entry);
        {
            let mut policy = self.policy.lock();
            match &old {
                Some(old_entry) => {
                    policy.on_update(&key, hash, version, old_entry.weight(), weight, now)
                }
                None => policy.on_insert(key.clone(), hash, version, weight, now),
            }
        }
        self.record_sketch(hash);
        if let Some(old_entry) = old {
            self.dispatch_with(|| CacheEvent::Evict {
                key: key.clone(),
                value: old_entry.into_value(),
                reason: RemovalReason::Replaced,
            });
        }
        match kind {
            WriteKind::Put => self.dispatch_with(|| CacheEvent::Put {
                key: key.clone(),
                value: value.clone(),
            }),
            WriteKind::Load => self.dispatch_with(|| CacheEvent::Load {
                key: key.clone(),
                value: value.clone(),
            }),
        }
        self.evict_as_needed(now);
    }

    /// Evicts until no configured bound is violated.
    ///
    /// Each round picks a victim under the policy lock, then removes it from
    /// the store only if its version still matches. A mismatch means a
    /// concurrent write replaced the entry after the decision, so the eviction
    /// is abandoned and the next round decides afresh. When the policy has
    /// no candidate but a bound is violated, an arbitrary stored entry is
    /// sacrificed instead.
    fn evict_as_needed(&self, now: u64) {
        loop {
            let (candidate, fallback_reason) = {
                let policy = self.policy.lock();
                match policy.next_victim(now) {
                    Some(victim) => (Some(victim), None),
                    None => (None, policy.violation()),
                }
            };
            let victim = match (candidate, fallback_reason) {
                (Some(victim), _) => victim,
                (None, Some(reason)) => match self.store.any_entry() {
                    Some((key, version)) => VictimRef {
                        key,
                        version,
                        reason,
                    },
                    None => break,
                },
                (None, None) => break,
            };
            let VictimRef {
                key,
                version,
                reason,
            } = victim;
            let hash = self.hash(&key);
            match self.store.remove_if_version(hash, &key, version) {
                RemoveOutcome::Removed(entry) => {
                    self.policy.lock().on_remove(&key, version);
                    self.stats.record_eviction();
                    self.dispatch_with(|| CacheEvent::Evict {
                        key,
                        value: entry.into_value(),
                        reason,
                    });
                }
                RemoveOutcome::VersionMismatch => {
                    // Stale decision; the replacing writer already refreshed
                    // the policy node. Pick again.
                }
                RemoveOutcome::Absent => {
                    // The entry left through another path; drop any phantom
                    // policy node so the loop makes progress.
                    self.policy.lock().on_remove(&key, version);
                }
            }
        }
    }

    fn remove_blocking(&self, key: &K) -> Option<V> {
        match &self.buffer {
            Some(buffer) => {
                let observed = match buffer.lookup(key) {
                    BufferedRead::Value(value) => Some(value),
                    BufferedRead::Removed | BufferedRead::Cleared => None,
                    BufferedRead::Untracked => {
                        let hash = self.hash(key);
                        let now = self.clock.now_nanos();
                        self.store
                            .read(hash, key, |entry| {
                                if self.expiry.is_expired(entry, now) {
                                    None
                                } else {
                                    Some(entry.value().clone())
                                }
                            })
                            .flatten()
                    }
                };
                if buffer.push_remove(key.clone()) {
                    self.drain_writes();
                }
                observed
            }
            None => self.apply_remove(key),
        }
    }

    fn apply_remove(&self, key: &K) -> Option<V> {
        let hash = self.hash(key);
        let now = self.clock.now_nanos();
        let entry = self.store.remove(hash, key)?;
        self.policy.lock().on_remove(key, entry.version());
        let expired = self.expiry.is_expired(&entry, now);
        let value = entry.into_value();
        if expired {
            // The entry was already logically dead; report the expiry, not
            // the removal.
            self.dispatch_with(|| CacheEvent::Expire {
                key: key.clone(),
                value: value.clone(),
            });
            None
        } else {
            self.dispatch_with(|| CacheEvent::Remove {
                key: key.clone(),
                value: value.clone(),
            });
            Some(value)
        }
    }

    fn clear_blocking(&self) {
        match &self.buffer {
            Some(buffer) => buffer.push_clear(),
            None => self.apply_clear(),
        }
    }

    fn apply_clear(&self) {
        self.store.clear();
        {
            let mut policy = self.policy.lock();
            policy.clear();
            debug_assert_eq!(policy.len(), 0);
        }
        self.dispatch_with(|| CacheEvent::Clear);
    }

    fn contains_now(&self, key: &K) -> bool {
        if let Some(buffer) = &self.buffer {
            match buffer.lookup(key) {
                BufferedRead::Value(_) => return true,
                BufferedRead::Removed | BufferedRead::Cleared => return false,
                BufferedRead::Untracked => {}
            }
        }
        let hash = self.hash(key);
        let now = self.clock.now_nanos();
        self.store
            .read(hash, key, |entry| !self.expiry.is_expired(entry, now))
            .unwrap_or(false)
    }

    /// One maintenance pass: buffer drain, expiration sweep, refreshes.
    fn run_maintenance(&self) {
        self.drain_writes();
        self.sweep_expired();
        self.run_refreshes();
    }

    /// Applies all pending buffered writes through the direct path.
    fn drain_writes(&self) {
        let Some(buffer) = &self.buffer else {
            return;
        };
        loop {
            let batch = buffer.drain_batch();
            if batch.is_empty() {
                break;
            }
            if batch.clear_first {
                self.apply_clear();
            }
            for (key, op) in batch.ops {
                match op {
                    PendingOp::Put(value) => self.apply_write(key, value, WriteKind::Put),
                    PendingOp::Remove => {
                        let _ = self.apply_remove(&key);
                    }
                }
            }
        }
    }

    /// Background safety net: sweeps a rotating subset of shards for entries
    /// the inline checks never got to.
    fn sweep_expired(&self) {
        if !self.expiry.expires() {
            return;
        }
        let now = self.clock.now_nanos();
        let shard_count = self.store.shard_count();
        let span = (shard_count / 4).max(1);
        let first = self.sweep_cursor.fetch_add(span, Ordering::Relaxed) % shard_count;
        let expired =
            self.store
                .collect_expired(first, span, SWEEP_LIMIT, |entry| {
                    self.expiry.is_expired(entry, now)
                });
        for (key, version) in expired {
            let hash = self.hash(&key);
            self.remove_expired(&key, hash, version);
        }
    }

    /// Marks `key` for an asynchronous reload; deduplicated until the reload
    /// completes.
    fn schedule_refresh(&self, key: &K, version: u64, hash: u64) {
        let mut refresh = self.refresh.lock();
        if refresh.queued.insert(key.clone()) {
            refresh.pending.push((key.clone(), version, hash));
        }
    }

    /// Executes pending refreshes on the maintenance thread. The stale value
    /// stays observable until its replacement lands; a reload result is
    /// discarded when a newer write beat it.
    fn run_refreshes(&self) {
        if !self.expiry.refreshes() || !self.can_load() {
            return;
        }
        let pending: Vec<(K, u64, u64)> = {
            let mut refresh = self.refresh.lock();
            std::mem::take(&mut refresh.pending)
        };
        for (key, version, hash) in pending {
            let started = self.clock.now_nanos();
            let outcome = self.invoke_loader_blocking(&key);
            let elapsed = self.clock.now_nanos().saturating_sub(started);
            match outcome {
                Ok(Some(value)) => {
                    self.stats.record_load(elapsed);
                    let now = self.clock.now_nanos();
                    let weight = self.weigh(&key, &value);
                    let new_version = self.next_version();
                    let entry = CacheEntry::new(value.clone(), weight, now, new_version);
                    if let Some(old) = self.store.replace_if_version(hash, &key, version, entry) {
                        self.policy.lock().on_update(
                            &key,
                            hash,
                            new_version,
                            old.weight(),
                            weight,
                            now,
                        );
                        self.dispatch_with(|| CacheEvent::Load {
                            key: key.clone(),
                            value: value.clone(),
                        });
                        self.evict_as_needed(now);
                    }
                }
                Ok(None) => {
                    self.stats.record_load(elapsed);
                    // The source says the key is gone; retire the stale entry.
                    if let RemoveOutcome::Removed(entry) =
                        self.store.remove_if_version(hash, &key, version)
                    {
                        self.policy.lock().on_remove(&key, version);
                        self.dispatch_with(|| CacheEvent::Evict {
                            key: key.clone(),
                            value: entry.into_value(),
                            reason: RemovalReason::LoaderError,
                        });
                    }
                }
                Err(error) => {
                    self.stats.record_load_failure(elapsed);
                    self.dispatch_with(|| CacheEvent::LoadError {
                        key: key.clone(),
                        error: error.clone(),
                    });
                }
            }
            self.refresh.lock().queued.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionStrategy;
    use std::time::Duration;

    fn lru_cache(max: u64) -> Cache<String, u32> {
        Cache::builder()
            .maximum_size(max)
            .eviction_strategy(EvictionStrategy::Lru)
            .concurrency_level(1)
            .background_maintenance(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_put_get_remove_roundtrip() {
        let cache = lru_cache(10);
        cache.put("a".into(), 1).unwrap();
        assert_eq!(cache.get(&"a".into()).unwrap(), Some(1));
        assert_eq!(cache.remove(&"a".into()).unwrap(), Some(1));
        assert_eq!(cache.get(&"a".into()).unwrap(), None);
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = lru_cache(10);
        cache.put("a".into(), 1).unwrap();
        cache.put("a".into(), 2).unwrap();
        assert_eq!(cache.size().unwrap(), 1);
        assert_eq!(cache.get(&"a".into()).unwrap(), Some(2));
    }

    #[test]
    fn test_shutdown_is_terminal_and_idempotent() {
        let cache = lru_cache(10);
        cache.put("a".into(), 1).unwrap();
        cache.shutdown().unwrap();
        cache.shutdown().unwrap();
        assert_eq!(cache.get(&"a".into()), Err(CacheError::Shutdown));
        assert_eq!(cache.put("b".into(), 2), Err(CacheError::Shutdown));
        assert_eq!(cache.clear(), Err(CacheError::Shutdown));
    }

    #[test]
    fn test_idle_policy_falls_back_to_arbitrary_scan() {
        // Fresh entries are never idle, so the policy offers no candidate;
        // the facade must still honor the size bound via the store scan.
        let cache: Cache<String, u32> = Cache::builder()
            .maximum_size(2)
            .eviction_strategy(EvictionStrategy::IdleTime {
                idle_limit: Duration::from_secs(3600),
            })
            .concurrency_level(1)
            .background_maintenance(false)
            .build()
            .unwrap();
        cache.put("a".into(), 1).unwrap();
        cache.put("b".into(), 2).unwrap();
        cache.put("c".into(), 3).unwrap();
        assert_eq!(cache.size().unwrap(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_read_only_view_serves_reads() {
        let cache = lru_cache(10);
        cache.put("a".into(), 1).unwrap();
        let view = cache.read_only();
        assert_eq!(view.get(&"a".into()).unwrap(), Some(1));
        assert!(view.contains(&"a".into()).unwrap());
        assert_eq!(view.size().unwrap(), 1);
        assert_eq!(view.get(&"missing".into()).unwrap(), None);
    }

    #[test]
    fn test_cloned_handles_share_state() {
        let cache = lru_cache(10);
        let twin = cache.clone();
        cache.put("a".into(), 1).unwrap();
        assert_eq!(twin.get(&"a".into()).unwrap(), Some(1));
    }
}
