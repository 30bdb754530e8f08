//! Buffered Write Path
//!
//! The write-heavy variants enqueue writes instead of applying them inline.
//! Pending operations are coalesced per key (a later `put` of the same key
//! supersedes anything already pending for it) and a background drain
//! applies them in batches under the store's normal write path.
//!
//! ```text
//!  put(k,v) ──▶ [ pending map + FIFO order queue ] ──batch──▶ store/policy
//!                      ▲
//!  get(k) ─────────────┘  (read-your-writes: pending value wins)
//! ```
//!
//! Reads consult the buffer before the store, so a thread always observes its
//! own writes. Distinct keys may be applied out of submission order; a single
//! key retains program order because its slot is overwritten in place.
//!
//! The buffer is bounded: when the number of distinct pending keys reaches
//! the high-water mark, the producing thread drains synchronously instead of
//! returning immediately, which keeps the store's bound from lagging by more
//! than one drain cycle.

use core::hash::Hash;
use std::collections::VecDeque;
use std::fmt;

use hashbrown::HashMap;
use parking_lot::Mutex;

/// A coalesced pending operation for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingOp<V> {
    /// The key's most recent buffered value.
    Put(V),
    /// The key has a buffered removal.
    Remove,
}

/// What the buffer knows about a key at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BufferedRead<V> {
    /// A pending put holds this value.
    Value(V),
    /// A pending remove hides any stored value.
    Removed,
    /// A pending clear hides the whole store.
    Cleared,
    /// The buffer knows nothing; consult the store.
    Untracked,
}

/// One drained batch, ready to apply.
#[derive(Debug, Default)]
pub(crate) struct DrainBatch<K, V> {
    /// A clear was requested before these operations.
    pub clear_first: bool,
    /// Coalesced operations in queue order (at most `batch_size`).
    pub ops: Vec<(K, PendingOp<V>)>,
}

impl<K, V> DrainBatch<K, V> {
    /// True when the batch carries no work at all.
    pub(crate) fn is_empty(&self) -> bool {
        !self.clear_first && self.ops.is_empty()
    }
}

struct BufferInner<K, V> {
    pending: HashMap<K, PendingOp<V>>,
    order: VecDeque<K>,
    clear_pending: bool,
}

/// Bounded, coalescing buffer of pending writes.
pub(crate) struct WriteBuffer<K, V> {
    inner: Mutex<BufferInner<K, V>>,
    high_water: usize,
    batch_size: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> WriteBuffer<K, V> {
    pub(crate) fn new(high_water: usize, batch_size: usize) -> Self {
        WriteBuffer {
            inner: Mutex::new(BufferInner {
                pending: HashMap::new(),
                order: VecDeque::new(),
                clear_pending: false,
            }),
            high_water: high_water.max(1),
            batch_size: batch_size.max(1),
        }
    }

    /// Enqueues a put. Returns `true` when the high-water mark was reached
    /// and the producer must drain before returning.
    pub(crate) fn push_put(&self, key: K, value: V) -> bool {
        let mut inner = self.inner.lock();
        if inner
            .pending
            .insert(key.clone(), PendingOp::Put(value))
            .is_none()
        {
            inner.order.push_back(key);
        }
        inner.pending.len() >= self.high_water
    }

    /// Enqueues a removal, superseding any pending put for the key.
    pub(crate) fn push_remove(&self, key: K) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending.insert(key.clone(), PendingOp::Remove).is_none() {
            inner.order.push_back(key);
        }
        inner.pending.len() >= self.high_water
    }

    /// Enqueues a clear, superseding everything already pending.
    pub(crate) fn push_clear(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.order.clear();
        inner.clear_pending = true;
    }

    /// Read-your-writes lookup.
    pub(crate) fn lookup(&self, key: &K) -> BufferedRead<V> {
        let inner = self.inner.lock();
        match inner.pending.get(key) {
            Some(PendingOp::Put(value)) => BufferedRead::Value(value.clone()),
            Some(PendingOp::Remove) => BufferedRead::Removed,
            None if inner.clear_pending => BufferedRead::Cleared,
            None => BufferedRead::Untracked,
        }
    }

    /// Pops up to one batch of coalesced operations, consuming a pending
    /// clear first if one is queued.
    pub(crate) fn drain_batch(&self) -> DrainBatch<K, V> {
        let mut inner = self.inner.lock();
        let clear_first = std::mem::take(&mut inner.clear_pending);
        let mut ops = Vec::new();
        while ops.len() < self.batch_size {
            let Some(key) = inner.order.pop_front() else {
                break;
            };
            // The slot may have been consumed by a clear between queue pushes.
            if let Some(op) = inner.pending.remove(&key) {
                ops.push((key, op));
            }
        }
        DrainBatch { clear_first, ops }
    }

    /// True when nothing is pending.
    pub(crate) fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending.is_empty() && !inner.clear_pending
    }

    /// Number of distinct keys with pending operations.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

impl<K, V> fmt::Debug for WriteBuffer<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("high_water", &self.high_water)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_puts_coalesce_per_key() {
        let buffer: WriteBuffer<&str, u32> = WriteBuffer::new(100, 256);
        for v in 1..=50 {
            buffer.push_put("k", v);
        }
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.lookup(&"k"), BufferedRead::Value(50));

        let batch = buffer.drain_batch();
        assert!(!batch.clear_first);
        assert_eq!(batch.ops, vec![("k", PendingOp::Put(50))]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_remove_supersedes_put() {
        let buffer: WriteBuffer<&str, u32> = WriteBuffer::new(100, 256);
        buffer.push_put("k", 1);
        buffer.push_remove("k");
        assert_eq!(buffer.lookup(&"k"), BufferedRead::Removed);
        let batch = buffer.drain_batch();
        assert_eq!(batch.ops, vec![("k", PendingOp::Remove)]);
    }

    #[test]
    fn test_clear_wipes_pending_and_hides_store() {
        let buffer: WriteBuffer<&str, u32> = WriteBuffer::new(100, 256);
        buffer.push_put("a", 1);
        buffer.push_put("b", 2);
        buffer.push_clear();
        assert_eq!(buffer.lookup(&"a"), BufferedRead::Cleared);
        assert_eq!(buffer.lookup(&"other"), BufferedRead::Cleared);

        // Writes after the clear are observable again.
        buffer.push_put("c", 3);
        assert_eq!(buffer.lookup(&"c"), BufferedRead::Value(3));

        let batch = buffer.drain_batch();
        assert!(batch.clear_first);
        assert_eq!(batch.ops, vec![("c", PendingOp::Put(3))]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_high_water_signals_producer() {
        let buffer: WriteBuffer<u32, u32> = WriteBuffer::new(3, 256);
        assert!(!buffer.push_put(1, 1));
        assert!(!buffer.push_put(2, 2));
        assert!(buffer.push_put(3, 3));
        // Coalescing keeps the distinct-key count flat.
        assert!(buffer.push_put(3, 4));
    }

    #[test]
    fn test_drain_respects_batch_size() {
        let buffer: WriteBuffer<u32, u32> = WriteBuffer::new(1000, 4);
        for k in 0..10 {
            buffer.push_put(k, k);
        }
        let first = buffer.drain_batch();
        assert_eq!(first.ops.len(), 4);
        let second = buffer.drain_batch();
        assert_eq!(second.ops.len(), 4);
        let third = buffer.drain_batch();
        assert_eq!(third.ops.len(), 2);
        assert!(buffer.drain_batch().is_empty());
    }

    #[test]
    fn test_same_key_program_order_survives_coalescing() {
        let buffer: WriteBuffer<&str, u32> = WriteBuffer::new(1000, 256);
        buffer.push_put("k", 1);
        buffer.push_remove("k");
        buffer.push_put("k", 2);
        // The last write wins; earlier ops for the key are gone.
        assert_eq!(buffer.lookup(&"k"), BufferedRead::Value(2));
        let batch = buffer.drain_batch();
        assert_eq!(batch.ops, vec![("k", PendingOp::Put(2))]);
    }
}
