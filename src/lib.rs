#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Architecture
//!
//! A request enters the [`Cache`] facade, consults the write buffer (when
//! the buffered path is configured), then the sharded entry store. A miss
//! may invoke the configured loader under single-flight. Policy and counter
//! updates happen on the way out, and periodic maintenance (expiration
//! sweep, write drain, refresh execution) runs on a background task driven
//! by the clock:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Cache facade                             │
//! │                                                                     │
//! │   get/put/remove        ┌───────────────┐     miss                  │
//! │  ───────────────▶       │ write buffer  │    ┌─────────────────┐    │
//! │                         │ (coalescing)  │    │ loader          │    │
//! │                         └──────┬────────┘    │ (single-flight) │    │
//! │                                ▼             └────────┬────────┘    │
//! │                         ┌───────────────┐             │             │
//! │                         │ sharded store │◀────────────┘             │
//! │                         └──────┬────────┘                           │
//! │                                ▼                                    │
//! │    ┌───────────────┐    ┌───────────────┐    ┌───────────────┐      │
//! │    │ event bus     │◀───│ policy + CM   │───▶│ stats         │      │
//! │    │ (listeners)   │    │ sketch        │    │ counters      │      │
//! │    └───────────────┘    └───────────────┘    └───────────────┘      │
//! │                                ▲                                    │
//! │                     housekeeper tick (expiry sweep,                 │
//! │                     buffer drain, refresh)                          │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Which eviction strategy?
//!
//! | Strategy | Ordering | Best for |
//! |----------|----------|----------|
//! | [`EvictionStrategy::TinyLfu`] | window LRU + SLRU + sketch admission | mixed/skewed workloads (default) |
//! | [`EvictionStrategy::Lru`] | recency | temporal locality |
//! | [`EvictionStrategy::Lfu`] | frequency buckets | stable popularity |
//! | [`EvictionStrategy::Fifo`] | insertion order | streaming, uniform value |
//! | [`EvictionStrategy::Filo`] | reverse insertion | keep-oldest workloads |
//! | [`EvictionStrategy::IdleTime`] | last access age | session-like data |
//!
//! # Modules
//!
//! - [`cache`]: the [`Cache`] facade, [`ReadOnlyCache`] view and async variants
//! - [`config`]: [`CacheBuilder`], [`Profile`] presets, [`ProfileRegistry`]
//! - [`clock`]: monotonic nanosecond clock (mockable for tests)
//! - [`entry`]: the versioned, weighted [`CacheEntry`]
//! - [`error`]: [`CacheError`] and [`CacheResult`]
//! - [`event`]: [`CacheEvent`] schema and [`EventListener`] dispatch
//! - [`sketch`]: the 4-bit Count-Min [`sketch::FrequencySketch`] behind admission
//! - [`stats`]: [`StatsSnapshot`] counters

/// Monotonic clock source backing recency and expiration.
pub mod clock;

/// Error types shared by construction and operations.
pub mod error;

/// Unified cache entry type.
///
/// Holds the value, weight, monotonic timestamps, the saturating access
/// counter and the entry version used to detect stale policy decisions.
pub mod entry;

/// Approximate per-key frequency estimation (Count-Min sketch with aging).
pub mod sketch;

/// Hit/miss/load/eviction counters and snapshots.
pub mod stats;

/// Entry events, removal reasons and listener dispatch.
pub mod event;

/// Sharded concurrent entry store.
///
/// Internal infrastructure shared by all cache variants; interact with it
/// through the [`Cache`] facade.
pub(crate) mod store;

/// Eviction policy machinery: tagged policy variants over an arena of
/// index-linked nodes, plus capacity/weight accounting.
pub(crate) mod policy;

/// TTL and refresh-after-write settings.
pub(crate) mod expiry;

/// Value loaders and the single-flight table.
pub mod loader;

/// Coalescing write buffer for the buffered write path.
pub(crate) mod buffer;

/// Per-cache background maintenance thread.
pub(crate) mod housekeeper;

/// Builder, options, profiles and the profile registry.
pub mod config;

/// The cache facade and its operation surface.
pub mod cache;

pub use cache::{Cache, ReadOnlyCache};
pub use clock::CacheClock;
pub use config::{
    CacheBuilder, EvictionStrategy, Profile, ProfilePreset, ProfileRegistry, Weigher, WriteMode,
};
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use event::{CacheEvent, EventKind, EventListener, RemovalReason};
pub use sketch::SketchMode;
pub use stats::StatsSnapshot;
