//! # LRU Policy
//!
//! Intrusive recency list: insert and access move a slot to the back, the
//! front is the victim.

use super::{EvictionPolicy, IndexList};

/// Least-recently-used eviction over arena slots.
#[derive(Debug, Default)]
pub(crate) struct LruPolicy {
    list: IndexList,
}

impl LruPolicy {
    pub fn new() -> Self {
        LruPolicy {
            list: IndexList::new(),
        }
    }
}

impl EvictionPolicy for LruPolicy {
    fn on_add(&mut self, slot: u32, _key_hash: u64) {
        self.list.push_back(slot);
    }

    fn on_access(&mut self, slot: u32, _key_hash: u64) {
        if self.list.is_linked(slot) {
            self.list.move_to_back(slot);
        }
    }

    fn on_remove(&mut self, slot: u32) {
        if self.list.is_linked(slot) {
            self.list.unlink(slot);
        }
    }

    fn select_victim(&mut self) -> Option<u32> {
        self.list.front()
    }

    fn clear(&mut self) {
        self.list.clear();
    }
}
