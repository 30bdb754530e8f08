//! Entry Event Bus
//!
//! Every entry that enters or leaves the cache produces exactly one event,
//! fanned out synchronously to the registered listeners on the thread that
//! performed the operation.
//!
//! | Event | Fired when |
//! |-------|------------|
//! | `Put` | A value was inserted or replaced an existing one. |
//! | `Remove` | An entry was removed explicitly. |
//! | `Evict` | An entry was displaced by size/weight pressure or replacement. |
//! | `Expire` | An entry's TTL elapsed (inline check or background sweep). |
//! | `Load` | A loader produced a value that was inserted. |
//! | `LoadError` | A loader invocation failed; nothing was cached. |
//! | `Clear` | The cache was cleared; covers every entry removed by it. |
//!
//! # Listener Discipline
//!
//! Listener panics are caught and logged; they never propagate into cache
//! operations. Listeners must not call back into the same cache: dispatch is
//! tracked with a thread-local depth so the facade can detect re-entry and
//! refuse it with [`CacheError::OperationUnavailable`](crate::CacheError)
//! instead of deadlocking.

use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::CacheError;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Displaced by the entry-count bound.
    Size,
    /// Displaced by the weight bound.
    Weight,
    /// TTL elapsed.
    Expired,
    /// Removed by an explicit `remove` or `clear`.
    Explicit,
    /// Overwritten by a newer value for the same key.
    Replaced,
    /// Dropped because a refreshing loader reported the key as absent.
    LoaderError,
}

/// A tagged entry event.
#[derive(Debug, Clone)]
pub enum CacheEvent<K, V> {
    /// A value was written.
    Put {
        /// Key written.
        key: K,
        /// Value written.
        value: V,
    },
    /// An entry was removed explicitly.
    Remove {
        /// Key removed.
        key: K,
        /// Value that was removed.
        value: V,
    },
    /// An entry was evicted.
    Evict {
        /// Key evicted.
        key: K,
        /// Value that was evicted.
        value: V,
        /// Why it was evicted.
        reason: RemovalReason,
    },
    /// An entry expired.
    Expire {
        /// Key that expired.
        key: K,
        /// Value that expired.
        value: V,
    },
    /// A loader produced and cached a value.
    Load {
        /// Key loaded.
        key: K,
        /// Value loaded.
        value: V,
    },
    /// A loader invocation failed.
    LoadError {
        /// Key whose load failed.
        key: K,
        /// The loader's error.
        error: CacheError,
    },
    /// The cache was cleared.
    Clear,
}

/// Discriminant of a [`CacheEvent`], handy for filtering in listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`CacheEvent::Put`].
    Put,
    /// See [`CacheEvent::Remove`].
    Remove,
    /// See [`CacheEvent::Evict`].
    Evict,
    /// See [`CacheEvent::Expire`].
    Expire,
    /// See [`CacheEvent::Load`].
    Load,
    /// See [`CacheEvent::LoadError`].
    LoadError,
    /// See [`CacheEvent::Clear`].
    Clear,
}

impl<K, V> CacheEvent<K, V> {
    /// The event's discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Put { .. } => EventKind::Put,
            CacheEvent::Remove { .. } => EventKind::Remove,
            CacheEvent::Evict { .. } => EventKind::Evict,
            CacheEvent::Expire { .. } => EventKind::Expire,
            CacheEvent::Load { .. } => EventKind::Load,
            CacheEvent::LoadError { .. } => EventKind::LoadError,
            CacheEvent::Clear => EventKind::Clear,
        }
    }

    /// The key this event concerns, if it concerns a single key.
    pub fn key(&self) -> Option<&K> {
        match self {
            CacheEvent::Put { key, .. }
            | CacheEvent::Remove { key, .. }
            | CacheEvent::Evict { key, .. }
            | CacheEvent::Expire { key, .. }
            | CacheEvent::Load { key, .. }
            | CacheEvent::LoadError { key, .. } => Some(key),
            CacheEvent::Clear => None,
        }
    }
}

/// A subscriber to entry events.
///
/// Implemented for any `Fn(&CacheEvent<K, V>)` closure, so simple listeners
/// can be registered without a named type.
pub trait EventListener<K, V>: Send + Sync {
    /// Called synchronously for every event, on the operating thread.
    fn on_event(&self, event: &CacheEvent<K, V>);
}

impl<K, V, F> EventListener<K, V> for F
where
    F: Fn(&CacheEvent<K, V>) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent<K, V>) {
        self(event)
    }
}

thread_local! {
    static DISPATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// True while the current thread is inside listener dispatch.
///
/// The facade refuses cache operations in this state: a listener calling back
/// into its own cache is undefined behavior per the event-bus contract.
pub(crate) fn in_dispatch() -> bool {
    DISPATCH_DEPTH.with(|d| d.get() > 0)
}

struct DispatchGuard;

impl DispatchGuard {
    fn enter() -> Self {
        DISPATCH_DEPTH.with(|d| d.set(d.get() + 1));
        DispatchGuard
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Ordered set of listeners attached to one cache.
pub(crate) struct ListenerSet<K, V> {
    listeners: Vec<Arc<dyn EventListener<K, V>>>,
}

impl<K, V> ListenerSet<K, V> {
    pub(crate) fn new(listeners: Vec<Arc<dyn EventListener<K, V>>>) -> Self {
        ListenerSet { listeners }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Dispatches `event` to every listener in registration order.
    ///
    /// Panics are caught per listener and logged; a failing listener does not
    /// stop the remaining ones from observing the event.
    pub(crate) fn dispatch(&self, event: &CacheEvent<K, V>) {
        if self.listeners.is_empty() {
            return;
        }
        let _guard = DispatchGuard::enter();
        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if outcome.is_err() {
                tracing::warn!(kind = ?event.kind(), "cache event listener panicked");
            }
        }
    }
}

impl<K, V> fmt::Debug for ListenerSet<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.listeners.len())
            .finish()
    }
}
