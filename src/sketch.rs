//! Approximate Frequency Sketch
//!
//! A 4-bit Count-Min sketch with periodic aging, used by the TinyLFU-style
//! admission filter to estimate how often a key has been accessed without
//! keeping per-key state.
//!
//! # How It Works
//!
//! The sketch is a `depth x width` table of 4-bit saturating counters packed
//! two per byte. Each recorded key hash is spread through four seeded mixers,
//! one per row, and the counter at each row's index is incremented (saturating
//! at 15). The estimated frequency of a key is the minimum of its four
//! counters, so hash collisions can only bias the estimate *upwards*: a
//! false positive admits an extra item, which is acceptable because admission
//! only decides which victim wins ties.
//!
//! # Aging
//!
//! After `reset_threshold = 10 x width` recorded samples, every counter is
//! halved (right shift by one) and the sample count restarts. This gives
//! exponential decay of historical frequency: an item that was popular an
//! hour ago but is cold now will lose admission contests against currently
//! warm items.
//!
//! # Concurrency
//!
//! Counter slots are atomic bytes; `record` and `frequency` are lock-free.
//! The sketch is advisory and eventually consistent; racing increments or a
//! concurrent aging pass can lose an update, which is harmless here.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Number of hash rows. Each row gets an independently mixed index.
const DEPTH: usize = 4;

/// Per-row mixing seeds (large odd constants, split-mix style).
const SEEDS: [u64; DEPTH] = [
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
    0xff51_afd7_ed55_8ccd,
];

/// Sizing modes for the sketch, selectable in the cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SketchMode {
    /// No sketch is kept; admission falls back to favoring the incoming entry.
    None,
    /// Width is the next power of two at or above the expected key count.
    #[default]
    Basic,
    /// Width is widened eightfold to cut collision bias on skewed workloads.
    Optimized,
}

impl SketchMode {
    /// Builds a sketch for roughly `expected_keys` distinct keys, or `None`
    /// when the mode disables the sketch.
    pub(crate) fn build(self, expected_keys: u64) -> Option<FrequencySketch> {
        let base = expected_keys.clamp(64, 1 << 26);
        match self {
            SketchMode::None => None,
            SketchMode::Basic => Some(FrequencySketch::with_width(base)),
            SketchMode::Optimized => Some(FrequencySketch::with_width(base.saturating_mul(8))),
        }
    }
}

/// A 4-bit Count-Min sketch with aging.
pub struct FrequencySketch {
    /// `DEPTH` rows of `width / 2` bytes, two 4-bit counters per byte.
    table: Box<[AtomicU8]>,
    /// Slots per row; always a power of two.
    width: usize,
    /// Samples recorded since the last aging pass.
    sample_count: AtomicUsize,
    /// Sample count that triggers the aging pass.
    reset_threshold: usize,
}

impl FrequencySketch {
    /// Creates a sketch whose row width is the next power of two at or above
    /// `min_width` (and at least 64 slots).
    pub(crate) fn with_width(min_width: u64) -> Self {
        let width = min_width.clamp(64, 1 << 28).next_power_of_two() as usize;
        let bytes = DEPTH * width / 2;
        let mut table = Vec::with_capacity(bytes);
        table.resize_with(bytes, || AtomicU8::new(0));
        FrequencySketch {
            table: table.into_boxed_slice(),
            width,
            sample_count: AtomicUsize::new(0),
            reset_threshold: 10 * width,
        }
    }

    /// Slots per row.
    #[cfg(test)]
    pub(crate) fn width(&self) -> usize {
        self.width
    }

    /// Records one access for `key_hash`, aging the table when the sample
    /// threshold is reached.
    pub(crate) fn record(&self, key_hash: u64) {
        for row in 0..DEPTH {
            let slot = self.index(key_hash, row);
            self.increment(row, slot);
        }
        if self.sample_count.fetch_add(1, Ordering::Relaxed) + 1 >= self.reset_threshold {
            // Exactly one thread claims the reset; the rest keep counting.
            if self.sample_count.swap(0, Ordering::Relaxed) >= self.reset_threshold {
                self.age();
            }
        }
    }

    /// Estimated access frequency of `key_hash`: the minimum of its counters.
    pub(crate) fn frequency(&self, key_hash: u64) -> u8 {
        let mut min = u8::MAX;
        for row in 0..DEPTH {
            let slot = self.index(key_hash, row);
            min = min.min(self.read(row, slot));
        }
        min
    }

    /// Samples recorded since the last aging pass.
    #[cfg(test)]
    pub(crate) fn sample_count(&self) -> usize {
        self.sample_count.load(Ordering::Relaxed)
    }

    /// Mixes `hash` with the row seed and maps it onto the row width.
    #[inline]
    fn index(&self, hash: u64, row: usize) -> usize {
        let mut h = hash.wrapping_add(SEEDS[row]);
        h = h.wrapping_mul(SEEDS[(row + 1) % DEPTH]);
        h ^= h >> 32;
        (h as usize) & (self.width - 1)
    }

    #[inline]
    fn cell(&self, row: usize, slot: usize) -> (&AtomicU8, bool) {
        let byte = row * (self.width / 2) + slot / 2;
        (&self.table[byte], slot & 1 == 1)
    }

    /// Increments one 4-bit counter, saturating at 15.
    fn increment(&self, row: usize, slot: usize) {
        let (cell, high) = self.cell(row, slot);
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let nibble = if high { current >> 4 } else { current & 0x0f };
            if nibble >= 15 {
                return;
            }
            let next = if high {
                (current & 0x0f) | ((nibble + 1) << 4)
            } else {
                (current & 0xf0) | (nibble + 1)
            };
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn read(&self, row: usize, slot: usize) -> u8 {
        let (cell, high) = self.cell(row, slot);
        let byte = cell.load(Ordering::Relaxed);
        if high {
            byte >> 4
        } else {
            byte & 0x0f
        }
    }

    /// Halves every counter. The 0x77 mask clears the bits that a right shift
    /// would otherwise leak across the nibble boundary.
    fn age(&self) {
        for cell in self.table.iter() {
            let byte = cell.load(Ordering::Relaxed);
            cell.store((byte >> 1) & 0x77, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for FrequencySketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencySketch")
            .field("width", &self.width)
            .field("reset_threshold", &self.reset_threshold)
            .field("sample_count", &self.sample_count.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_grows_with_records() {
        let sketch = FrequencySketch::with_width(64);
        assert_eq!(sketch.frequency(42), 0);
        for _ in 0..5 {
            sketch.record(42);
        }
        assert!(sketch.frequency(42) >= 5);
    }

    #[test]
    fn test_counters_saturate_at_fifteen() {
        let sketch = FrequencySketch::with_width(64);
        for _ in 0..100 {
            sketch.record(7);
        }
        assert_eq!(sketch.frequency(7), 15);
    }

    #[test]
    fn test_aging_halves_counters() {
        let sketch = FrequencySketch::with_width(64);
        assert_eq!(sketch.width(), 64);
        for _ in 0..10 {
            sketch.record(1);
        }
        assert_eq!(sketch.frequency(1), 10);
        sketch.age();
        assert_eq!(sketch.frequency(1), 5);
        sketch.age();
        assert_eq!(sketch.frequency(1), 2);
    }

    #[test]
    fn test_reset_threshold_zeroes_sample_count() {
        let sketch = FrequencySketch::with_width(64);
        let threshold = sketch.reset_threshold;
        for i in 0..threshold as u64 {
            sketch.record(i);
        }
        // The record that reached the threshold ran the aging pass.
        assert_eq!(sketch.sample_count(), 0);
    }

    #[test]
    fn test_distinct_keys_do_not_share_all_rows() {
        let sketch = FrequencySketch::with_width(1024);
        for _ in 0..15 {
            sketch.record(0xdead_beef);
        }
        // An unrelated key should estimate well below saturation.
        assert!(sketch.frequency(0x1234_5678) < 15);
    }

    #[test]
    fn test_mode_selection() {
        assert!(SketchMode::None.build(1000).is_none());
        let basic = SketchMode::Basic.build(1000).unwrap();
        let optimized = SketchMode::Optimized.build(1000).unwrap();
        assert_eq!(basic.width(), 1024);
        assert_eq!(optimized.width(), 8192);
    }
}
