//! Expiration and Refresh Settings
//!
//! Three independent timers per cache, all optional:
//!
//! - `expire_after_write`: an entry dies at `write_ns + ttl_w`.
//! - `expire_after_access`: an entry dies at `access_ns + ttl_a`.
//! - `refresh_after_write`: at `write_ns + ttl_r` the first accessor
//!   schedules an asynchronous reload; the stale value keeps being served
//!   until the reload lands.
//!
//! Expiration is enforced in two places. Reads and writes check inline and
//! remove expired entries on the spot; that is the primary mechanism. A
//! background maintenance tick additionally sweeps a rotating subset of
//! shards as a safety net for entries that are never touched again.

use std::time::Duration;

use crate::entry::CacheEntry;

/// Default upper bound on the maintenance tick.
pub(crate) const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Resolved TTL configuration, in clock nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ExpirySettings {
    pub expire_after_write_ns: Option<u64>,
    pub expire_after_access_ns: Option<u64>,
    pub refresh_after_write_ns: Option<u64>,
}

impl ExpirySettings {
    pub(crate) fn new(
        expire_after_write: Option<Duration>,
        expire_after_access: Option<Duration>,
        refresh_after_write: Option<Duration>,
    ) -> Self {
        let ns = |d: Duration| d.as_nanos().min(u128::from(u64::MAX)) as u64;
        ExpirySettings {
            expire_after_write_ns: expire_after_write.map(ns),
            expire_after_access_ns: expire_after_access.map(ns),
            refresh_after_write_ns: refresh_after_write.map(ns),
        }
    }

    /// True when any TTL is configured (refresh alone does not expire).
    pub(crate) fn expires(&self) -> bool {
        self.expire_after_write_ns.is_some() || self.expire_after_access_ns.is_some()
    }

    /// True when refresh-after-write is configured.
    pub(crate) fn refreshes(&self) -> bool {
        self.refresh_after_write_ns.is_some()
    }

    /// Whether `entry` is past either TTL at `now_ns`.
    #[inline]
    pub(crate) fn is_expired<V>(&self, entry: &CacheEntry<V>, now_ns: u64) -> bool {
        if let Some(ttl) = self.expire_after_write_ns {
            if entry.age_nanos(now_ns) > ttl {
                return true;
            }
        }
        if let Some(ttl) = self.expire_after_access_ns {
            if entry.idle_nanos(now_ns) > ttl {
                return true;
            }
        }
        false
    }

    /// Whether `entry` is due for a background reload at `now_ns`.
    #[inline]
    pub(crate) fn needs_refresh<V>(&self, entry: &CacheEntry<V>, now_ns: u64) -> bool {
        match self.refresh_after_write_ns {
            Some(ttl) => entry.age_nanos(now_ns) > ttl,
            None => false,
        }
    }

    /// The maintenance tick: the shortest configured timer, capped at the
    /// one-second default.
    pub(crate) fn tick_interval(&self) -> Duration {
        let mut tick = DEFAULT_TICK;
        for ns in [
            self.expire_after_write_ns,
            self.expire_after_access_ns,
            self.refresh_after_write_ns,
        ]
        .into_iter()
        .flatten()
        {
            tick = tick.min(Duration::from_nanos(ns));
        }
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_at(write_ns: u64) -> CacheEntry<u32> {
        CacheEntry::new(0, 1, write_ns, 1)
    }

    #[test]
    fn test_write_ttl() {
        let expiry = ExpirySettings::new(Some(Duration::from_nanos(100)), None, None);
        let entry = entry_at(1_000);
        assert!(!expiry.is_expired(&entry, 1_100));
        assert!(expiry.is_expired(&entry, 1_101));
    }

    #[test]
    fn test_access_ttl_resets_on_touch() {
        let expiry = ExpirySettings::new(None, Some(Duration::from_nanos(100)), None);
        let entry = entry_at(0);
        assert!(expiry.is_expired(&entry, 101));
        entry.touch(90);
        assert!(!expiry.is_expired(&entry, 101));
        assert!(expiry.is_expired(&entry, 191));
    }

    #[test]
    fn test_refresh_due_only_after_interval() {
        let expiry = ExpirySettings::new(None, None, Some(Duration::from_nanos(50)));
        let entry = entry_at(0);
        assert!(!expiry.is_expired(&entry, 1_000), "refresh never expires");
        assert!(!expiry.needs_refresh(&entry, 50));
        assert!(expiry.needs_refresh(&entry, 51));
        assert!(expiry.refreshes());
        assert!(!expiry.expires());
    }

    #[test]
    fn test_tick_interval_tracks_shortest_timer() {
        let none = ExpirySettings::default();
        assert_eq!(none.tick_interval(), DEFAULT_TICK);

        let short = ExpirySettings::new(
            Some(Duration::from_millis(20)),
            Some(Duration::from_secs(5)),
            None,
        );
        assert_eq!(short.tick_interval(), Duration::from_millis(20));
    }
}
