//! # Cache Entries
//!
//! Per-entry metadata for the sharded store. Access timestamps and counts
//! are atomics so the read path can update them under the shard read lock;
//! everything else is mutated under the shard write lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A stored entry: the value plus lifecycle metadata.
///
/// Weight is fixed for the life of the entry; a `put` over an existing key
/// starts a new entry life with a freshly computed weight.
#[derive(Debug)]
pub(crate) struct CacheEntry<K, V> {
    /// Owned key copy, needed when a policy victim is removed by slot.
    pub key: K,
    /// Shared value buffer so readers never copy the payload.
    pub value: Arc<V>,
    /// Weight under the aggregate-weight bound.
    pub weight: u64,
    /// Creation time, nanoseconds since the store epoch.
    pub created_nanos: u64,
    /// Last write time, nanoseconds since the store epoch.
    pub written_nanos: u64,
    /// Last access time; updated atomically on the read path.
    accessed_nanos: AtomicU64,
    /// Saturating access counter.
    access_count: AtomicU64,
}

impl<K, V> CacheEntry<K, V> {
    /// Creates an entry stamped at `now_nanos`.
    pub fn new(key: K, value: Arc<V>, weight: u64, now_nanos: u64) -> Self {
        CacheEntry {
            key,
            value,
            weight,
            created_nanos: now_nanos,
            written_nanos: now_nanos,
            accessed_nanos: AtomicU64::new(now_nanos),
            access_count: AtomicU64::new(0),
        }
    }

    /// Replaces the value in place, starting a new write epoch.
    ///
    /// Creation time is preserved; the access clock moves with the write so
    /// access-relative expiry cannot fire before the new value is readable.
    pub fn replace(&mut self, value: Arc<V>, weight: u64, now_nanos: u64) {
        self.value = value;
        self.weight = weight;
        self.written_nanos = now_nanos;
        self.accessed_nanos.store(now_nanos, Ordering::Relaxed);
    }

    /// Marks the entry as read at `now_nanos`.
    pub fn record_access(&self, now_nanos: u64) {
        self.accessed_nanos.store(now_nanos, Ordering::Relaxed);
        // Saturating increment; wrap-around would confuse frequency readers.
        let count = self.access_count.load(Ordering::Relaxed);
        if count < u64::MAX {
            self.access_count.store(count.saturating_add(1), Ordering::Relaxed);
        }
    }

    /// Last access time, nanoseconds since the store epoch.
    pub fn accessed_nanos(&self) -> u64 {
        self.accessed_nanos.load(Ordering::Relaxed)
    }

    /// Number of recorded accesses.
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Returns true when any configured deadline has passed.
    pub fn is_expired(
        &self,
        now_nanos: u64,
        expire_after_write: Option<Duration>,
        expire_after_access: Option<Duration>,
    ) -> bool {
        if let Some(ttl) = expire_after_write {
            if now_nanos >= self.written_nanos.saturating_add(ttl.as_nanos() as u64) {
                return true;
            }
        }
        if let Some(ttl) = expire_after_access {
            let accessed = self.accessed_nanos.load(Ordering::Relaxed);
            if now_nanos >= accessed.saturating_add(ttl.as_nanos() as u64) {
                return true;
            }
        }
        false
    }

    /// Remaining write-relative TTL at `now_nanos`, if one is configured.
    pub fn remaining_write_ttl(
        &self,
        now_nanos: u64,
        expire_after_write: Option<Duration>,
    ) -> Option<Duration> {
        let ttl = expire_after_write?;
        let deadline = self.written_nanos.saturating_add(ttl.as_nanos() as u64);
        Some(Duration::from_nanos(deadline.saturating_sub(now_nanos)))
    }

    /// Returns true when the entry is stale enough for refresh-ahead.
    pub fn needs_refresh(&self, now_nanos: u64, refresh_after_write: Option<Duration>) -> bool {
        match refresh_after_write {
            Some(refresh) => {
                now_nanos >= self.written_nanos.saturating_add(refresh.as_nanos() as u64)
            }
            None => false,
        }
    }
}

/// Read-only view of an entry's metadata, exposed for diagnostics.
#[derive(Debug, Clone)]
pub struct EntryView<V> {
    /// Shared value.
    pub value: Arc<V>,
    /// Entry weight.
    pub weight: u64,
    /// Age since creation.
    pub age: Duration,
    /// Time since the last recorded access.
    pub idle: Duration,
    /// Recorded access count.
    pub access_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(now: u64) -> CacheEntry<&'static str, u32> {
        CacheEntry::new("alpha", Arc::new(1), 1, now)
    }

    #[test]
    fn timestamps_start_at_creation() {
        let entry = entry(100);
        assert_eq!(entry.created_nanos, 100);
        assert_eq!(entry.written_nanos, 100);
        assert_eq!(entry.accessed_nanos(), 100);
        assert_eq!(entry.access_count(), 0);
    }

    #[test]
    fn record_access_moves_clock_forward() {
        let entry = entry(100);
        entry.record_access(250);
        assert_eq!(entry.accessed_nanos(), 250);
        assert_eq!(entry.access_count(), 1);
    }

    #[test]
    fn write_expiry_fires_after_deadline() {
        let entry = entry(0);
        let ttl = Some(Duration::from_nanos(500));
        assert!(!entry.is_expired(499, ttl, None));
        assert!(entry.is_expired(500, ttl, None));
    }

    #[test]
    fn access_expiry_resets_on_read() {
        let entry = entry(0);
        let ttl = Some(Duration::from_nanos(500));
        entry.record_access(400);
        assert!(!entry.is_expired(700, None, ttl));
        assert!(entry.is_expired(900, None, ttl));
    }

    #[test]
    fn replace_starts_new_write_epoch() {
        let mut entry = entry(0);
        entry.replace(Arc::new(2), 3, 1_000);
        assert_eq!(entry.written_nanos, 1_000);
        assert_eq!(entry.weight, 3);
        assert_eq!(entry.created_nanos, 0);
        assert!(!entry.is_expired(1_400, Some(Duration::from_nanos(500)), None));
    }

    #[test]
    fn refresh_threshold_is_write_relative() {
        let entry = entry(0);
        let refresh = Some(Duration::from_nanos(300));
        assert!(!entry.needs_refresh(299, refresh));
        assert!(entry.needs_refresh(300, refresh));
        assert!(!entry.needs_refresh(1_000, None));
    }
}
