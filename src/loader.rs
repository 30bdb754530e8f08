//! Value Loaders and Single-Flight Deduplication
//!
//! A cache may be configured with a loader that computes missing values:
//!
//! - **Sync**: `Fn(&K) -> Result<Option<V>, CacheError>`, invoked on the
//!   calling thread.
//! - **Async**: `Fn(&K) -> BoxFuture<Result<Option<V>, CacheError>>`,
//!   awaited on the caller's executor; the cache never owns a runtime.
//!
//! Concurrent requests for the same missing key are *single-flighted*: the
//! first caller becomes the leader and runs the loader, everyone else joins
//! the flight and receives the leader's outcome. Sync followers block on a
//! condvar gate; async followers await a oneshot receiver, so an async
//! caller that is canceled simply drops its receiver and leaves the flight.
//!
//! Loads run with no cache locks held. The flight table only pins the flight
//! entry itself, so a slow loader for one key never blocks loads or reads of
//! other keys.

use core::hash::Hash;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

use crate::error::{CacheError, CacheResult};

/// What a loader produced: a value, a definitive absence, or a failure.
pub type LoadOutcome<V> = CacheResult<Option<V>>;

/// Synchronous miss handler.
pub type SyncLoader<K, V> = Arc<dyn Fn(&K) -> LoadOutcome<V> + Send + Sync>;

/// Asynchronous miss handler returning a boxed future.
pub type AsyncLoader<K, V> = Arc<dyn Fn(&K) -> BoxFuture<'static, LoadOutcome<V>> + Send + Sync>;

/// Blocking completion gate shared by the sync followers of one flight.
pub(crate) struct LoadGate<V> {
    result: Mutex<Option<LoadOutcome<V>>>,
    ready: Condvar,
}

impl<V: Clone> LoadGate<V> {
    fn new() -> Self {
        LoadGate {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Blocks until the leader completes the flight, then returns its outcome.
    pub(crate) fn wait(&self) -> LoadOutcome<V> {
        let mut guard = self.result.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut guard);
        }
    }

    fn complete(&self, outcome: LoadOutcome<V>) {
        *self.result.lock() = Some(outcome);
        self.ready.notify_all();
    }
}

impl<V> fmt::Debug for LoadGate<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadGate").finish_non_exhaustive()
    }
}

struct InFlight<V> {
    gate: Arc<LoadGate<V>>,
    waiters: Vec<oneshot::Sender<LoadOutcome<V>>>,
}

impl<V: Clone> InFlight<V> {
    fn new() -> Self {
        InFlight {
            gate: Arc::new(LoadGate::new()),
            waiters: Vec::new(),
        }
    }
}

/// A blocking caller's position in a flight.
pub(crate) enum JoinSync<V> {
    /// This caller owns the flight: it must run the loader and complete.
    Leader,
    /// Another caller is loading; block on the gate.
    Wait(Arc<LoadGate<V>>),
}

/// An async caller's position in a flight.
pub(crate) enum JoinAsync<V> {
    /// This caller owns the flight: it must run the loader and complete.
    Leader,
    /// Another caller is loading; await the receiver.
    Wait(oneshot::Receiver<LoadOutcome<V>>),
}

/// Per-cache registry of in-flight loads, keyed by cache key.
pub(crate) struct FlightTable<K, V> {
    flights: Mutex<HashMap<K, InFlight<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> FlightTable<K, V> {
    pub(crate) fn new() -> Self {
        FlightTable {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Joins the flight for `key` as a blocking caller, becoming the leader
    /// if no flight exists.
    pub(crate) fn join_sync(&self, key: &K) -> JoinSync<V> {
        let mut flights = self.flights.lock();
        match flights.get(key) {
            Some(flight) => JoinSync::Wait(Arc::clone(&flight.gate)),
            None => {
                flights.insert(key.clone(), InFlight::new());
                JoinSync::Leader
            }
        }
    }

    /// Joins the flight for `key` as an async caller, becoming the leader if
    /// no flight exists.
    pub(crate) fn join_async(&self, key: &K) -> JoinAsync<V> {
        let mut flights = self.flights.lock();
        match flights.get_mut(key) {
            Some(flight) => {
                let (tx, rx) = oneshot::channel();
                flight.waiters.push(tx);
                JoinAsync::Wait(rx)
            }
            None => {
                flights.insert(key.clone(), InFlight::new());
                JoinAsync::Leader
            }
        }
    }

    /// Completes the flight for `key`, delivering `outcome` to every waiter.
    ///
    /// Async waiters that canceled are skipped silently (their receiver is
    /// gone). A no-op when the flight has already been completed or aborted.
    pub(crate) fn complete(&self, key: &K, outcome: LoadOutcome<V>) {
        let flight = self.flights.lock().remove(key);
        if let Some(flight) = flight {
            for tx in flight.waiters {
                let _ = tx.send(outcome.clone());
            }
            flight.gate.complete(outcome);
        }
    }

    /// Fails every pending flight with `error`. Used at shutdown so no caller
    /// is left blocked.
    pub(crate) fn abort_all(&self, error: &CacheError) {
        let drained: Vec<(K, InFlight<V>)> = {
            let mut flights = self.flights.lock();
            flights.drain().collect()
        };
        for (_, flight) in drained {
            for tx in flight.waiters {
                let _ = tx.send(Err(error.clone()));
            }
            flight.gate.complete(Err(error.clone()));
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.flights.lock().is_empty()
    }
}

impl<K, V> fmt::Debug for FlightTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlightTable").finish_non_exhaustive()
    }
}

/// Completion obligation held by a flight leader.
///
/// If the leader is dropped without completing (its future was canceled, or
/// it panicked through the loader), the flight is failed so followers are
/// released and the next request can start a fresh load.
pub(crate) struct LeaderGuard<'a, K: Hash + Eq + Clone, V: Clone> {
    table: &'a FlightTable<K, V>,
    key: Option<K>,
}

impl<'a, K: Hash + Eq + Clone, V: Clone> LeaderGuard<'a, K, V> {
    pub(crate) fn new(table: &'a FlightTable<K, V>, key: K) -> Self {
        LeaderGuard {
            table,
            key: Some(key),
        }
    }

    /// Completes the flight with the loader's outcome.
    pub(crate) fn complete(mut self, outcome: LoadOutcome<V>) {
        if let Some(key) = self.key.take() {
            self.table.complete(&key, outcome);
        }
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.table
                .complete(&key, Err(CacheError::loader("load interrupted")));
        }
    }
}
