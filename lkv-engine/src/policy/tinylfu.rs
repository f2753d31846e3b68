//! # W-TinyLFU Policy
//!
//! A small LRU admission window in front of a segmented main region
//! (probation + protected). Window overflow produces candidates; a
//! candidate displaces the main victim only when its sketched frequency is
//! strictly higher, so one-hit wonders die in the window while repeat keys
//! earn main-region residency. Aging is driven by the sketch's halving.

use crate::sketch::FrequencySketch;

use super::{EvictionPolicy, IndexList};

/// Window share of total capacity, in percent.
const WINDOW_PERCENT: u64 = 1;

/// Protected share of the main region, in percent.
const PROTECTED_PERCENT: u64 = 80;

/// Segment an active slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Segment {
    #[default]
    None,
    Window,
    Probation,
    Protected,
}

/// Windowed TinyLFU eviction over arena slots.
#[derive(Debug)]
pub(crate) struct TinyLfuPolicy {
    window: IndexList,
    probation: IndexList,
    protected: IndexList,
    segment: Vec<Segment>,
    key_hash: Vec<u64>,
    sketch: FrequencySketch,
    window_cap: usize,
    main_cap: usize,
    protected_cap: usize,
}

impl TinyLfuPolicy {
    /// Creates a policy sized for `capacity` entries.
    pub fn new(capacity: u64) -> Self {
        let capacity = capacity.max(2);
        let window_cap = (capacity * WINDOW_PERCENT / 100).max(1);
        let main_cap = capacity - window_cap;
        let protected_cap = main_cap * PROTECTED_PERCENT / 100;
        TinyLfuPolicy {
            window: IndexList::new(),
            probation: IndexList::new(),
            protected: IndexList::new(),
            segment: Vec::new(),
            key_hash: Vec::new(),
            sketch: FrequencySketch::with_capacity(capacity),
            window_cap: window_cap as usize,
            main_cap: main_cap as usize,
            protected_cap: protected_cap as usize,
        }
    }

    fn ensure_slot(&mut self, slot: u32) {
        let needed = slot as usize + 1;
        if self.segment.len() < needed {
            self.segment.resize(needed, Segment::None);
            self.key_hash.resize(needed, 0);
        }
    }

    fn main_len(&self) -> usize {
        self.probation.len() + self.protected.len()
    }

    /// Moves a window slot into probation.
    fn admit_to_probation(&mut self, slot: u32) {
        self.window.unlink(slot);
        self.probation.push_back(slot);
        self.segment[slot as usize] = Segment::Probation;
    }

    /// Demotes the protected LRU into probation when over the segment cap.
    fn rebalance_protected(&mut self) {
        while self.protected.len() > self.protected_cap {
            match self.protected.pop_front() {
                Some(demoted) => {
                    self.probation.push_back(demoted);
                    self.segment[demoted as usize] = Segment::Probation;
                }
                None => break,
            }
        }
    }
}

impl EvictionPolicy for TinyLfuPolicy {
    fn on_add(&mut self, slot: u32, key_hash: u64) {
        self.ensure_slot(slot);
        self.key_hash[slot as usize] = key_hash;
        self.sketch.increment(key_hash);
        self.window.push_back(slot);
        self.segment[slot as usize] = Segment::Window;
    }

    fn on_access(&mut self, slot: u32, key_hash: u64) {
        if (slot as usize) >= self.segment.len() {
            return;
        }
        self.sketch.increment(key_hash);
        match self.segment[slot as usize] {
            Segment::None => {}
            Segment::Window => self.window.move_to_back(slot),
            Segment::Probation => {
                // A second touch earns protected residency.
                self.probation.unlink(slot);
                self.protected.push_back(slot);
                self.segment[slot as usize] = Segment::Protected;
                self.rebalance_protected();
            }
            Segment::Protected => self.protected.move_to_back(slot),
        }
    }

    fn on_remove(&mut self, slot: u32) {
        if (slot as usize) >= self.segment.len() {
            return;
        }
        match self.segment[slot as usize] {
            Segment::None => return,
            Segment::Window => self.window.unlink(slot),
            Segment::Probation => self.probation.unlink(slot),
            Segment::Protected => self.protected.unlink(slot),
        }
        self.segment[slot as usize] = Segment::None;
    }

    fn select_victim(&mut self) -> Option<u32> {
        loop {
            if self.window.len() > self.window_cap {
                let candidate = self.window.front()?;

                // Room in the main region admits the candidate outright.
                if self.main_len() < self.main_cap {
                    self.admit_to_probation(candidate);
                    continue;
                }

                let victim = self.probation.front().or_else(|| self.protected.front());
                let victim = match victim {
                    Some(victim) => victim,
                    None => return Some(candidate),
                };

                let candidate_freq = self.sketch.frequency(self.key_hash[candidate as usize]);
                let victim_freq = self.sketch.frequency(self.key_hash[victim as usize]);
                if candidate_freq > victim_freq {
                    self.admit_to_probation(candidate);
                    return Some(victim);
                }
                // Ties favor the incumbent: the candidate dies in the window.
                return Some(candidate);
            }

            return self
                .probation
                .front()
                .or_else(|| self.protected.front())
                .or_else(|| self.window.front());
        }
    }

    fn clear(&mut self) {
        self.window.clear();
        self.probation.clear();
        self.protected.clear();
        self.segment.clear();
        self.key_hash.clear();
    }
}
