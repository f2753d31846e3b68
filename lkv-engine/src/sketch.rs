//! # Frequency Sketch
//!
//! Count-Min-style estimator with 4-bit counters, used for W-TinyLFU
//! admission. Each key maps to four counters through independently derived
//! indexes; the estimate is the minimum of the four. After `sample_size`
//! increments every counter is halved, which ages out stale popularity.

/// Counters per 64-bit word (4 bits each).
const COUNTERS_PER_WORD: usize = 16;

/// Maximum value a 4-bit counter can hold.
const MAX_COUNT: u8 = 15;

/// Mixing constants shared with the index derivation (splitmix64 finalizer).
const MIX_1: u64 = 0xff51_afd7_ed55_8ccd;
const MIX_2: u64 = 0xc4ce_b9fe_1a85_ec53;

/// Approximate access-frequency counter in constant space per entry.
#[derive(Debug)]
pub struct FrequencySketch {
    /// Packed 4-bit counters, 16 per word.
    table: Vec<u64>,
    /// Mask for word selection; table length is a power of two.
    table_mask: usize,
    /// Increments until the next aging pass.
    sample_size: u64,
    /// Increments observed since the last aging pass.
    additions: u64,
}

impl FrequencySketch {
    /// Creates a sketch sized for roughly `capacity` distinct keys.
    ///
    /// The table length is the next power of two at or above `capacity`,
    /// with a floor of 64 counters to keep collision noise down for tiny
    /// caches.
    pub fn with_capacity(capacity: u64) -> Self {
        let counters = capacity.max(64).next_power_of_two() as usize;
        let words = (counters / COUNTERS_PER_WORD).max(1).next_power_of_two();
        FrequencySketch {
            table: vec![0; words],
            table_mask: words - 1,
            sample_size: (counters as u64).saturating_mul(10),
            additions: 0,
        }
    }

    /// Estimated frequency of the key hash: the minimum of its counters.
    pub fn frequency(&self, key_hash: u64) -> u8 {
        let mut min = MAX_COUNT;
        for i in 0..4 {
            let (word, shift) = self.position(key_hash, i);
            let count = ((self.table[word] >> shift) & 0xF) as u8;
            min = min.min(count);
        }
        min
    }

    /// Increments the key's counters, saturating at 15.
    ///
    /// Triggers the aging pass once `sample_size` increments accumulate.
    pub fn increment(&mut self, key_hash: u64) {
        let mut added = false;
        for i in 0..4 {
            let (word, shift) = self.position(key_hash, i);
            let count = (self.table[word] >> shift) & 0xF;
            if count < MAX_COUNT as u64 {
                self.table[word] += 1 << shift;
                added = true;
            }
        }

        if added {
            self.additions += 1;
            if self.additions >= self.sample_size {
                self.reset();
            }
        }
    }

    /// Halves every counter and the addition count.
    ///
    /// Keeps the sketch responsive when the popular set shifts.
    fn reset(&mut self) {
        for word in self.table.iter_mut() {
            // Halve all 16 packed counters at once; the mask clears the bit
            // that would otherwise leak from the neighbouring counter.
            *word = (*word >> 1) & 0x7777_7777_7777_7777;
        }
        self.additions /= 2;
    }

    /// Derives the word index and bit shift for hash function `i`.
    fn position(&self, key_hash: u64, i: u64) -> (usize, u32) {
        let mut hash = key_hash.wrapping_add(i.wrapping_mul(MIX_1));
        hash ^= hash >> 33;
        hash = hash.wrapping_mul(MIX_2);
        hash ^= hash >> 29;
        let word = (hash as usize) & self.table_mask;
        let counter = ((hash >> 32) as usize) % COUNTERS_PER_WORD;
        (word, (counter * 4) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_tracks_increments() {
        let mut sketch = FrequencySketch::with_capacity(128);
        assert_eq!(sketch.frequency(42), 0);
        sketch.increment(42);
        sketch.increment(42);
        sketch.increment(42);
        assert!(sketch.frequency(42) >= 3);
    }

    #[test]
    fn estimate_never_exceeds_saturation() {
        let mut sketch = FrequencySketch::with_capacity(128);
        for _ in 0..100 {
            sketch.increment(7);
        }
        assert_eq!(sketch.frequency(7), MAX_COUNT);
    }

    #[test]
    fn estimate_upper_bounds_true_count() {
        let mut sketch = FrequencySketch::with_capacity(1024);
        for _ in 0..5 {
            sketch.increment(1);
        }
        // Minimum-of-four can overestimate via collisions but the counter
        // arithmetic itself never undercounts a single key below its cap.
        assert!(sketch.frequency(1) >= 5);
    }

    #[test]
    fn distinct_keys_are_mostly_independent() {
        let mut sketch = FrequencySketch::with_capacity(4096);
        for _ in 0..10 {
            sketch.increment(100);
        }
        assert!(sketch.frequency(100) >= 10);
        assert!(sketch.frequency(200) < 10);
    }

    #[test]
    fn aging_halves_counters() {
        let mut sketch = FrequencySketch::with_capacity(64);
        for _ in 0..12 {
            sketch.increment(9);
        }
        let before = sketch.frequency(9);
        sketch.reset();
        let after = sketch.frequency(9);
        assert_eq!(after, before / 2);
    }

    #[test]
    fn table_is_power_of_two() {
        let sketch = FrequencySketch::with_capacity(1000);
        assert!(sketch.table.len().is_power_of_two());
        assert_eq!(sketch.table_mask, sketch.table.len() - 1);
    }
}
