//! # FIFO Policy
//!
//! Insertion-ordered queue; accesses never reorder, the oldest insertion is
//! always the victim.

use super::{EvictionPolicy, IndexList};

/// First-in-first-out eviction over arena slots.
#[derive(Debug, Default)]
pub(crate) struct FifoPolicy {
    queue: IndexList,
}

impl FifoPolicy {
    pub fn new() -> Self {
        FifoPolicy {
            queue: IndexList::new(),
        }
    }
}

impl EvictionPolicy for FifoPolicy {
    fn on_add(&mut self, slot: u32, _key_hash: u64) {
        self.queue.push_back(slot);
    }

    fn on_access(&mut self, _slot: u32, _key_hash: u64) {}

    fn on_remove(&mut self, slot: u32) {
        if self.queue.is_linked(slot) {
            self.queue.unlink(slot);
        }
    }

    fn select_victim(&mut self) -> Option<u32> {
        self.queue.front()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_does_not_change_order() {
        let mut policy = FifoPolicy::new();
        policy.on_add(0, 0);
        policy.on_add(1, 0);
        policy.on_access(0, 0);
        policy.on_access(0, 0);
        assert_eq!(policy.select_victim(), Some(0));
    }

    #[test]
    fn victims_follow_insertion_order() {
        let mut policy = FifoPolicy::new();
        for slot in [4, 2, 9] {
            policy.on_add(slot, 0);
        }
        for expected in [4, 2, 9] {
            let victim = policy.select_victim().unwrap();
            assert_eq!(victim, expected);
            policy.on_remove(victim);
        }
    }
}
