//! Monotonic Clock Source
//!
//! All recency and expiration decisions in the cache are driven by a single
//! monotonic nanosecond tick stream. Wall-clock time is never consulted:
//! entries record the tick at which they were written and last accessed, and
//! the expiration engine compares those ticks against the current one.
//!
//! The clock is mockable so that TTL and refresh behavior can be tested
//! without sleeping: [`CacheClock::mock`] returns a handle whose time only
//! advances when the test tells it to.

use std::sync::Arc;

use quanta::{Clock, Instant, Mock};

/// Monotonic nanosecond clock backing a cache instance.
///
/// Ticks are reported as nanoseconds elapsed since the clock was created.
/// Starting from a per-cache anchor keeps tick values small and makes
/// arithmetic on them (`now - write_ns`) immune to epoch concerns.
///
/// Cloning is cheap; clones share the same anchor and therefore produce
/// comparable tick values.
#[derive(Debug, Clone)]
pub struct CacheClock {
    clock: Clock,
    anchor: Instant,
}

impl CacheClock {
    /// Creates a clock backed by the operating system's monotonic source.
    pub fn new() -> Self {
        let clock = Clock::new();
        let anchor = clock.now();
        CacheClock { clock, anchor }
    }

    /// Creates a mocked clock for tests.
    ///
    /// The returned [`Mock`] controls the flow of time: call
    /// `mock.increment(duration)` to advance it. Until then, every call to
    /// [`now_nanos`](Self::now_nanos) reports the same tick.
    pub fn mock() -> (Self, Arc<Mock>) {
        let (clock, mock) = Clock::mock();
        let anchor = clock.now();
        (CacheClock { clock, anchor }, mock)
    }

    /// Returns the current tick in nanoseconds since this clock's anchor.
    #[inline]
    pub fn now_nanos(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }
}

impl Default for CacheClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_real_clock_is_monotonic() {
        let clock = CacheClock::new();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn test_mock_clock_advances_on_demand() {
        let (clock, mock) = CacheClock::mock();
        let start = clock.now_nanos();
        assert_eq!(clock.now_nanos(), start);

        mock.increment(Duration::from_millis(5));
        assert_eq!(clock.now_nanos(), start + 5_000_000);
    }

    #[test]
    fn test_clones_share_anchor() {
        let (clock, mock) = CacheClock::mock();
        let twin = clock.clone();
        mock.increment(Duration::from_nanos(42));
        assert_eq!(clock.now_nanos(), twin.now_nanos());
    }
}
