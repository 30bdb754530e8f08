//! Cache Configuration
//!
//! All caches are created through [`CacheBuilder`], the single entry point
//! for every recognized option:
//!
//! | Option | Effect |
//! |--------|--------|
//! | `maximum_size` | Hard entry-count bound. |
//! | `maximum_weight` + `weigher` | Hard weight bound; the weigher maps `(k, v)` to a weight. |
//! | `expire_after_write` | TTL from the last write. |
//! | `expire_after_access` | TTL from the last access. |
//! | `refresh_after_write` | Background reload interval (requires a loader). |
//! | `initial_capacity` | Hash-map pre-sizing hint. |
//! | `concurrency_level` | Shard-count hint, rounded up to a power of two. |
//! | `eviction_strategy` | One of [`EvictionStrategy`]. |
//! | `frequency_sketch` | [`SketchMode`] for the admission filter. |
//! | `record_stats` | Enables the counters (default on). |
//! | `loader` / `async_loader` | Miss handlers. |
//! | `listener` | Ordered event subscribers. |
//! | `profile` | A preset bundle; see [`Profile`]. |
//!
//! Validation happens once, in [`CacheBuilder::build`]; a misconfigured
//! builder fails fatally with
//! [`CacheError::InvalidConfiguration`](crate::CacheError) and a built cache
//! never re-validates anything.
//!
//! # Profiles
//!
//! Profiles are plain preset bundles held in an explicit [`ProfileRegistry`]
//! value; there is no process-global registry or hidden initialization.
//! The eight built-in profiles cover common workload shapes; custom presets
//! can be registered under any name and applied the same way.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use hashbrown::HashMap;

use crate::clock::CacheClock;
use crate::error::{CacheError, CacheResult};
use crate::event::EventListener;
use crate::loader::{AsyncLoader, LoadOutcome, SyncLoader};
use crate::sketch::SketchMode;

/// Maps `(key, value)` to a non-negative weight in abstract units.
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// The eviction orderings a cache can be built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionStrategy {
    /// Least recently used.
    Lru,
    /// Least frequently used, bucketed by access count.
    Lfu,
    /// First in, first out (evicts the oldest insertion).
    Fifo,
    /// First in, last out (evicts the newest insertion).
    Filo,
    /// Evicts entries idle longer than the limit.
    IdleTime {
        /// Idle time beyond which an entry becomes evictable.
        idle_limit: Duration,
    },
    /// Window + segmented-LRU main with sketch-based admission. The default.
    #[default]
    TinyLfu,
}

/// How writes reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Every write synchronously updates store and policy.
    #[default]
    Direct,
    /// Writes are coalesced in a bounded buffer and drained in batches.
    Buffered {
        /// Distinct pending keys at which producers flush synchronously.
        high_water: usize,
        /// Operations applied per drain batch.
        batch_size: usize,
    },
}

impl WriteMode {
    /// The buffered mode with default sizing (1024 pending keys, batches of
    /// 256).
    pub fn buffered() -> Self {
        WriteMode::Buffered {
            high_water: 1024,
            batch_size: 256,
        }
    }
}

/// Built-in workload profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Balanced defaults: W-TinyLFU, basic sketch, 1000 entries.
    Default,
    /// Read-heavy: LFU with a widened sketch, 1000 entries.
    ReadHeavy,
    /// Write-heavy: LRU over the buffered write path, 1000 entries.
    WriteHeavy,
    /// Memory-constrained: LRU, 100 entries, no sketch.
    MemoryEfficient,
    /// Latency-first: LRU, 10000 entries, stats off.
    HighPerformance,
    /// Session store: LRU, 30-minute access TTL, 2000 entries.
    SessionCache,
    /// API response cache: W-TinyLFU, 15-minute write TTL, 500 entries.
    ApiCache,
    /// Expensive computations: LFU, 2-hour write TTL, 1000 entries.
    ComputeCache,
}

impl Profile {
    /// Every built-in profile.
    pub const ALL: [Profile; 8] = [
        Profile::Default,
        Profile::ReadHeavy,
        Profile::WriteHeavy,
        Profile::MemoryEfficient,
        Profile::HighPerformance,
        Profile::SessionCache,
        Profile::ApiCache,
        Profile::ComputeCache,
    ];

    /// The profile's registry name.
    pub fn name(&self) -> &'static str {
        match self {
            Profile::Default => "default",
            Profile::ReadHeavy => "read_heavy",
            Profile::WriteHeavy => "write_heavy",
            Profile::MemoryEfficient => "memory_efficient",
            Profile::HighPerformance => "high_performance",
            Profile::SessionCache => "session_cache",
            Profile::ApiCache => "api_cache",
            Profile::ComputeCache => "compute_cache",
        }
    }

    /// The option bundle this profile stands for.
    pub fn preset(&self) -> ProfilePreset {
        match self {
            Profile::Default => ProfilePreset {
                eviction_strategy: EvictionStrategy::TinyLfu,
                frequency_sketch: SketchMode::Basic,
                maximum_size: 1000,
                ..ProfilePreset::base()
            },
            Profile::ReadHeavy => ProfilePreset {
                eviction_strategy: EvictionStrategy::Lfu,
                frequency_sketch: SketchMode::Optimized,
                maximum_size: 1000,
                ..ProfilePreset::base()
            },
            Profile::WriteHeavy => ProfilePreset {
                eviction_strategy: EvictionStrategy::Lru,
                frequency_sketch: SketchMode::None,
                maximum_size: 1000,
                write_mode: WriteMode::buffered(),
                ..ProfilePreset::base()
            },
            Profile::MemoryEfficient => ProfilePreset {
                eviction_strategy: EvictionStrategy::Lru,
                frequency_sketch: SketchMode::None,
                maximum_size: 100,
                ..ProfilePreset::base()
            },
            Profile::HighPerformance => ProfilePreset {
                eviction_strategy: EvictionStrategy::Lru,
                frequency_sketch: SketchMode::None,
                maximum_size: 10_000,
                record_stats: false,
                ..ProfilePreset::base()
            },
            Profile::SessionCache => ProfilePreset {
                eviction_strategy: EvictionStrategy::Lru,
                frequency_sketch: SketchMode::None,
                maximum_size: 2000,
                expire_after_access: Some(Duration::from_secs(30 * 60)),
                ..ProfilePreset::base()
            },
            Profile::ApiCache => ProfilePreset {
                eviction_strategy: EvictionStrategy::TinyLfu,
                frequency_sketch: SketchMode::Basic,
                maximum_size: 500,
                expire_after_write: Some(Duration::from_secs(15 * 60)),
                ..ProfilePreset::base()
            },
            Profile::ComputeCache => ProfilePreset {
                eviction_strategy: EvictionStrategy::Lfu,
                frequency_sketch: SketchMode::Basic,
                maximum_size: 1000,
                expire_after_write: Some(Duration::from_secs(2 * 60 * 60)),
                ..ProfilePreset::base()
            },
        }
    }
}

/// The options a profile pins down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilePreset {
    /// Eviction ordering.
    pub eviction_strategy: EvictionStrategy,
    /// Admission sketch mode.
    pub frequency_sketch: SketchMode,
    /// Entry-count bound.
    pub maximum_size: u64,
    /// Write TTL, if the profile sets one.
    pub expire_after_write: Option<Duration>,
    /// Access TTL, if the profile sets one.
    pub expire_after_access: Option<Duration>,
    /// Whether counters are recorded.
    pub record_stats: bool,
    /// Direct or buffered writes.
    pub write_mode: WriteMode,
}

impl ProfilePreset {
    /// The neutral starting point profiles are diffed against.
    fn base() -> Self {
        ProfilePreset {
            eviction_strategy: EvictionStrategy::TinyLfu,
            frequency_sketch: SketchMode::Basic,
            maximum_size: 1000,
            expire_after_write: None,
            expire_after_access: None,
            record_stats: true,
            write_mode: WriteMode::Direct,
        }
    }
}

/// An explicit, by-value registry of named presets.
///
/// Threaded through construction instead of living in process-global state;
/// two registries never interfere.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    presets: HashMap<String, ProfilePreset>,
}

impl ProfileRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        ProfileRegistry {
            presets: HashMap::new(),
        }
    }

    /// A registry pre-populated with the built-in profiles.
    pub fn builtin() -> Self {
        let mut registry = ProfileRegistry::new();
        for profile in Profile::ALL {
            registry.register(profile.name(), profile.preset());
        }
        registry
    }

    /// Registers (or replaces) a preset under `name`.
    pub fn register(&mut self, name: impl Into<String>, preset: ProfilePreset) {
        self.presets.insert(name.into(), preset);
    }

    /// Looks up a preset by name.
    pub fn get(&self, name: &str) -> Option<&ProfilePreset> {
        self.presets.get(name)
    }

    /// Registered names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.presets.keys().map(String::as_str)
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        ProfileRegistry::builtin()
    }
}

/// Builder for [`Cache`](crate::Cache) instances.
///
/// # Examples
///
/// ```
/// use polycache::{Cache, EvictionStrategy};
///
/// let cache: Cache<String, u32> = Cache::builder()
///     .maximum_size(100)
///     .eviction_strategy(EvictionStrategy::Lru)
///     .build()
///     .unwrap();
/// cache.put("answer".to_string(), 42).unwrap();
/// assert_eq!(cache.get(&"answer".to_string()).unwrap(), Some(42));
/// ```
pub struct CacheBuilder<K, V> {
    pub(crate) maximum_size: Option<u64>,
    pub(crate) maximum_weight: Option<u64>,
    pub(crate) weigher: Option<Weigher<K, V>>,
    pub(crate) expire_after_write: Option<Duration>,
    pub(crate) expire_after_access: Option<Duration>,
    pub(crate) refresh_after_write: Option<Duration>,
    pub(crate) initial_capacity: Option<usize>,
    pub(crate) concurrency_level: Option<usize>,
    pub(crate) eviction_strategy: EvictionStrategy,
    pub(crate) frequency_sketch: SketchMode,
    pub(crate) record_stats: bool,
    pub(crate) write_mode: WriteMode,
    pub(crate) loader: Option<SyncLoader<K, V>>,
    pub(crate) async_loader: Option<AsyncLoader<K, V>>,
    pub(crate) listeners: Vec<Arc<dyn EventListener<K, V>>>,
    pub(crate) clock: Option<CacheClock>,
    pub(crate) background_maintenance: bool,
    pub(crate) tick_interval: Option<Duration>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        CacheBuilder {
            maximum_size: None,
            maximum_weight: None,
            weigher: None,
            expire_after_write: None,
            expire_after_access: None,
            refresh_after_write: None,
            initial_capacity: None,
            concurrency_level: None,
            eviction_strategy: EvictionStrategy::default(),
            frequency_sketch: SketchMode::default(),
            record_stats: true,
            write_mode: WriteMode::default(),
            loader: None,
            async_loader: None,
            listeners: Vec::new(),
            clock: None,
            background_maintenance: true,
            tick_interval: None,
        }
    }
}

impl<K, V> CacheBuilder<K, V> {
    /// A builder with all defaults: unbounded, W-TinyLFU, basic sketch,
    /// direct writes, stats on.
    pub fn new() -> Self {
        CacheBuilder::default()
    }

    /// Hard bound on the number of entries.
    #[must_use]
    pub fn maximum_size(mut self, maximum_size: u64) -> Self {
        self.maximum_size = Some(maximum_size);
        self
    }

    /// Hard bound on the summed entry weight. Requires a [`weigher`](Self::weigher).
    #[must_use]
    pub fn maximum_weight(mut self, maximum_weight: u64) -> Self {
        self.maximum_weight = Some(maximum_weight);
        self
    }

    /// Weighing function for the weight bound.
    #[must_use]
    pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u64 + Send + Sync + 'static) -> Self {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Entries expire this long after their last write.
    #[must_use]
    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    /// Entries expire this long after their last access.
    #[must_use]
    pub fn expire_after_access(mut self, ttl: Duration) -> Self {
        self.expire_after_access = Some(ttl);
        self
    }

    /// Entries are reloaded in the background this long after their last
    /// write; the stale value keeps being served meanwhile.
    #[must_use]
    pub fn refresh_after_write(mut self, interval: Duration) -> Self {
        self.refresh_after_write = Some(interval);
        self
    }

    /// Pre-sizing hint for the shard hash maps.
    #[must_use]
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Shard-count hint; rounded up to a power of two. Defaults to four times
    /// the available parallelism.
    #[must_use]
    pub fn concurrency_level(mut self, level: usize) -> Self {
        self.concurrency_level = Some(level);
        self
    }

    /// Selects the eviction ordering.
    #[must_use]
    pub fn eviction_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.eviction_strategy = strategy;
        self
    }

    /// Selects the admission sketch sizing.
    #[must_use]
    pub fn frequency_sketch(mut self, mode: SketchMode) -> Self {
        self.frequency_sketch = mode;
        self
    }

    /// Enables or disables the statistics counters.
    #[must_use]
    pub fn record_stats(mut self, enabled: bool) -> Self {
        self.record_stats = enabled;
        self
    }

    /// Selects the write path.
    #[must_use]
    pub fn write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Installs an infallible synchronous loader invoked on misses.
    #[must_use]
    pub fn loader(mut self, loader: impl Fn(&K) -> Option<V> + Send + Sync + 'static) -> Self {
        self.loader = Some(Arc::new(move |key| Ok(loader(key))));
        self
    }

    /// Installs a synchronous loader that may fail.
    #[must_use]
    pub fn fallible_loader(
        mut self,
        loader: impl Fn(&K) -> LoadOutcome<V> + Send + Sync + 'static,
    ) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Installs an asynchronous loader invoked on misses from the async
    /// operations (and driven by the maintenance thread for refreshes).
    #[must_use]
    pub fn async_loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn(&K) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = LoadOutcome<V>> + Send + 'static,
    {
        self.async_loader = Some(Arc::new(move |key| loader(key).boxed()));
        self
    }

    /// Appends an event listener; listeners fire in registration order.
    #[must_use]
    pub fn listener(mut self, listener: impl EventListener<K, V> + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Applies a built-in profile's preset.
    #[must_use]
    pub fn profile(self, profile: Profile) -> Self {
        self.preset(&profile.preset())
    }

    /// Applies a preset (from a [`ProfileRegistry`] or hand-built). Options
    /// set after this call override the preset.
    #[must_use]
    pub fn preset(mut self, preset: &ProfilePreset) -> Self {
        self.eviction_strategy = preset.eviction_strategy;
        self.frequency_sketch = preset.frequency_sketch;
        self.maximum_size = Some(preset.maximum_size);
        self.expire_after_write = preset.expire_after_write;
        self.expire_after_access = preset.expire_after_access;
        self.record_stats = preset.record_stats;
        self.write_mode = preset.write_mode;
        self
    }

    /// Injects a clock. Intended for tests driving a mocked clock.
    #[must_use]
    pub fn clock(mut self, clock: CacheClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Disables the background maintenance thread. Expiration still happens
    /// inline; sweeps, drains and refreshes then only run through
    /// [`Cache::run_pending_tasks`](crate::Cache::run_pending_tasks).
    #[must_use]
    pub fn background_maintenance(mut self, enabled: bool) -> Self {
        self.background_maintenance = enabled;
        self
    }

    /// Overrides the maintenance tick interval.
    #[must_use]
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub(crate) fn validate(&self) -> CacheResult<()> {
        let invalid = |message: &str| {
            Err(CacheError::InvalidConfiguration(message.to_owned()))
        };
        if self.maximum_size == Some(0) {
            return invalid("maximum_size must be greater than zero");
        }
        if self.maximum_weight == Some(0) {
            return invalid("maximum_weight must be greater than zero");
        }
        if self.maximum_weight.is_some() && self.weigher.is_none() {
            return invalid("maximum_weight requires a weigher");
        }
        if self.concurrency_level == Some(0) {
            return invalid("concurrency_level must be greater than zero");
        }
        if let EvictionStrategy::IdleTime { idle_limit } = self.eviction_strategy {
            if idle_limit.is_zero() {
                return invalid("idle_limit must be greater than zero");
            }
        }
        if self.eviction_strategy == EvictionStrategy::TinyLfu
            && self.maximum_size.is_none()
            && self.maximum_weight.is_none()
        {
            return invalid("the TinyLfu strategy requires maximum_size or maximum_weight");
        }
        if self.eviction_strategy == EvictionStrategy::TinyLfu
            && self.frequency_sketch == SketchMode::None
        {
            return invalid("the TinyLfu strategy requires a frequency sketch");
        }
        if self.refresh_after_write.is_some()
            && self.loader.is_none()
            && self.async_loader.is_none()
        {
            return invalid("refresh_after_write requires a loader");
        }
        if let Some(interval) = self.tick_interval {
            if interval.is_zero() {
                return invalid("tick_interval must be greater than zero");
            }
        }
        Ok(())
    }
}

impl<K, V> fmt::Debug for CacheBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("maximum_size", &self.maximum_size)
            .field("maximum_weight", &self.maximum_weight)
            .field("has_weigher", &self.weigher.is_some())
            .field("expire_after_write", &self.expire_after_write)
            .field("expire_after_access", &self.expire_after_access)
            .field("refresh_after_write", &self.refresh_after_write)
            .field("eviction_strategy", &self.eviction_strategy)
            .field("frequency_sketch", &self.frequency_sketch)
            .field("record_stats", &self.record_stats)
            .field("write_mode", &self.write_mode)
            .field("has_loader", &self.loader.is_some())
            .field("has_async_loader", &self.async_loader.is_some())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Builder = CacheBuilder<String, u32>;

    #[test]
    fn test_defaults() {
        let builder = Builder::new();
        assert_eq!(builder.eviction_strategy, EvictionStrategy::TinyLfu);
        assert_eq!(builder.frequency_sketch, SketchMode::Basic);
        assert!(builder.record_stats);
        assert_eq!(builder.write_mode, WriteMode::Direct);
    }

    #[test]
    fn test_zero_bounds_are_rejected() {
        assert!(Builder::new().maximum_size(0).validate().is_err());
        assert!(Builder::new()
            .maximum_weight(0)
            .weigher(|_, _| 1)
            .validate()
            .is_err());
        assert!(Builder::new().concurrency_level(0).validate().is_err());
    }

    #[test]
    fn test_weight_bound_without_weigher_is_rejected() {
        let err = Builder::new().maximum_weight(10).validate().unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_tinylfu_needs_bound_and_sketch() {
        assert!(Builder::new().validate().is_err(), "unbounded TinyLfu");
        assert!(Builder::new()
            .maximum_size(10)
            .frequency_sketch(SketchMode::None)
            .validate()
            .is_err());
        assert!(Builder::new().maximum_size(10).validate().is_ok());
    }

    #[test]
    fn test_refresh_requires_loader() {
        assert!(Builder::new()
            .maximum_size(10)
            .refresh_after_write(Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(Builder::new()
            .maximum_size(10)
            .refresh_after_write(Duration::from_secs(1))
            .loader(|_| None)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_profile_presets_match_their_workloads() {
        let read_heavy = Profile::ReadHeavy.preset();
        assert_eq!(read_heavy.eviction_strategy, EvictionStrategy::Lfu);
        assert_eq!(read_heavy.frequency_sketch, SketchMode::Optimized);

        let write_heavy = Profile::WriteHeavy.preset();
        assert_eq!(write_heavy.eviction_strategy, EvictionStrategy::Lru);
        assert!(matches!(write_heavy.write_mode, WriteMode::Buffered { .. }));

        let high_performance = Profile::HighPerformance.preset();
        assert!(!high_performance.record_stats);
        assert_eq!(high_performance.maximum_size, 10_000);

        let session = Profile::SessionCache.preset();
        assert_eq!(
            session.expire_after_access,
            Some(Duration::from_secs(30 * 60))
        );
    }

    #[test]
    fn test_builder_overrides_applied_profile() {
        let builder = Builder::new().profile(Profile::Default).maximum_size(5);
        assert_eq!(builder.maximum_size, Some(5));
        assert_eq!(builder.eviction_strategy, EvictionStrategy::TinyLfu);
    }

    #[test]
    fn test_registry_holds_builtins_and_custom_presets() {
        let mut registry = ProfileRegistry::builtin();
        assert_eq!(registry.names().count(), Profile::ALL.len());
        assert!(registry.get("api_cache").is_some());
        assert!(registry.get("nope").is_none());

        let mut custom = Profile::Default.preset();
        custom.maximum_size = 7;
        registry.register("tiny", custom);
        assert_eq!(registry.get("tiny").unwrap().maximum_size, 7);

        let builder = Builder::new().preset(registry.get("tiny").unwrap());
        assert_eq!(builder.maximum_size, Some(7));
    }
}
