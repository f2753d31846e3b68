//! # LFU Policy
//!
//! Frequency buckets over arena slots: each bucket is an intrusive list of
//! slots with the same access count, and a min-frequency cursor makes victim
//! selection O(1). Promotion moves a slot one bucket up without scanning.

use hashbrown::HashMap;

use super::{EvictionPolicy, NIL};

/// Head and tail of one frequency bucket's intrusive list.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    head: u32,
    tail: u32,
}

/// Least-frequently-used eviction with O(1) bucket promotion.
///
/// Link arrays are indexed by slot and shared across buckets; a slot is in
/// exactly one bucket at a time.
#[derive(Debug, Default)]
pub(crate) struct LfuPolicy {
    prev: Vec<u32>,
    next: Vec<u32>,
    freq: Vec<u64>,
    linked: Vec<bool>,
    buckets: HashMap<u64, Bucket>,
    min_freq: u64,
    len: usize,
}

impl LfuPolicy {
    pub fn new() -> Self {
        LfuPolicy::default()
    }

    fn ensure_slot(&mut self, slot: u32) {
        let needed = slot as usize + 1;
        if self.prev.len() < needed {
            self.prev.resize(needed, NIL);
            self.next.resize(needed, NIL);
            self.freq.resize(needed, 0);
            self.linked.resize(needed, false);
        }
    }

    /// Appends `slot` at the tail of bucket `freq`.
    fn bucket_push(&mut self, freq: u64, slot: u32) {
        let idx = slot as usize;
        self.freq[idx] = freq;
        self.next[idx] = NIL;
        match self.buckets.get_mut(&freq) {
            Some(bucket) => {
                self.prev[idx] = bucket.tail;
                self.next[bucket.tail as usize] = slot;
                bucket.tail = slot;
            }
            None => {
                self.prev[idx] = NIL;
                self.buckets.insert(freq, Bucket { head: slot, tail: slot });
            }
        }
        self.linked[idx] = true;
        self.len += 1;
    }

    /// Detaches `slot` from its bucket, dropping the bucket when empty.
    fn bucket_unlink(&mut self, slot: u32) {
        let idx = slot as usize;
        let freq = self.freq[idx];
        let (prev, next) = (self.prev[idx], self.next[idx]);

        if prev != NIL {
            self.next[prev as usize] = next;
        }
        if next != NIL {
            self.prev[next as usize] = prev;
        }

        let remove_bucket = {
            let bucket = self.buckets.get_mut(&freq).expect("bucket exists");
            if bucket.head == slot {
                bucket.head = next;
            }
            if bucket.tail == slot {
                bucket.tail = prev;
            }
            bucket.head == NIL
        };
        if remove_bucket {
            self.buckets.remove(&freq);
        }

        self.prev[idx] = NIL;
        self.next[idx] = NIL;
        self.linked[idx] = false;
        self.len -= 1;
    }
}

impl EvictionPolicy for LfuPolicy {
    fn on_add(&mut self, slot: u32, _key_hash: u64) {
        self.ensure_slot(slot);
        self.bucket_push(1, slot);
        self.min_freq = 1;
    }

    fn on_access(&mut self, slot: u32, _key_hash: u64) {
        if !self.linked.get(slot as usize).copied().unwrap_or(false) {
            return;
        }
        let freq = self.freq[slot as usize];
        self.bucket_unlink(slot);
        self.bucket_push(freq + 1, slot);
        // The accessed slot was the only way the min bucket could empty here.
        if self.min_freq == freq && !self.buckets.contains_key(&freq) {
            self.min_freq = freq + 1;
        }
    }

    fn on_remove(&mut self, slot: u32) {
        if self.linked.get(slot as usize).copied().unwrap_or(false) {
            self.bucket_unlink(slot);
        }
    }

    fn select_victim(&mut self) -> Option<u32> {
        if self.len == 0 {
            return None;
        }
        // Removals can leave the cursor on a vanished bucket; re-anchor it.
        if !self.buckets.contains_key(&self.min_freq) {
            self.min_freq = *self.buckets.keys().min().expect("non-empty policy");
        }
        self.buckets.get(&self.min_freq).map(|bucket| bucket.head)
    }

    fn clear(&mut self) {
        self.prev.clear();
        self.next.clear();
        self.freq.clear();
        self.linked.clear();
        self.buckets.clear();
        self.min_freq = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn victim_is_least_frequent() {
        let mut policy = LfuPolicy::new();
        policy.on_add(0, 0);
        policy.on_add(1, 0);
        policy.on_add(2, 0);
        policy.on_access(0, 0);
        policy.on_access(0, 0);
        policy.on_access(1, 0);
        assert_eq!(policy.select_victim(), Some(2));
    }

    #[test]
    fn promotion_moves_one_bucket_up() {
        let mut policy = LfuPolicy::new();
        policy.on_add(0, 0);
        policy.on_access(0, 0);
        assert_eq!(policy.freq[0], 2);
        policy.on_access(0, 0);
        assert_eq!(policy.freq[0], 3);
    }

    #[test]
    fn ties_break_by_bucket_order() {
        let mut policy = LfuPolicy::new();
        policy.on_add(5, 0);
        policy.on_add(6, 0);
        // Both at frequency 1; the older insertion is at the bucket head.
        assert_eq!(policy.select_victim(), Some(5));
    }

    #[test]
    fn removal_reanchors_min_cursor() {
        let mut policy = LfuPolicy::new();
        policy.on_add(0, 0);
        policy.on_add(1, 0);
        policy.on_access(1, 0);
        policy.on_remove(0);
        assert_eq!(policy.select_victim(), Some(1));
    }

    #[test]
    fn empty_policy_has_no_victim() {
        let mut policy = LfuPolicy::new();
        assert_eq!(policy.select_victim(), None);
        policy.on_add(0, 0);
        policy.on_remove(0);
        assert_eq!(policy.select_victim(), None);
    }
}
