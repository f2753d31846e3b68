//! # Cache Statistics
//!
//! Lock-free saturating counters for the hot path plus a snapshot type for
//! readers. Counters use relaxed atomics; cross-counter consistency is not
//! required, only per-counter monotonicity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::listener::RemovalCause;

/// Adds `delta` to `counter`, sticking at `u64::MAX` instead of wrapping.
fn saturating_add(counter: &AtomicU64, delta: u64) {
    let mut current = counter.load(Ordering::Relaxed);
    loop {
        let next = current.saturating_add(delta);
        match counter.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

/// Thread-safe statistics accumulator shared by all shards of one cache.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    load_time_nanos: AtomicU64,
    evictions_size: AtomicU64,
    evictions_weight: AtomicU64,
    evictions_expired: AtomicU64,
    evictions_explicit: AtomicU64,
    evictions_replaced: AtomicU64,
    evictions_collected: AtomicU64,
    evictions_migrated: AtomicU64,
}

impl StatsCounters {
    pub fn record_hit(&self) {
        saturating_add(&self.hits, 1);
    }

    pub fn record_miss(&self) {
        saturating_add(&self.misses, 1);
    }

    pub fn record_load_success(&self, load_time: Duration) {
        saturating_add(&self.loads, 1);
        saturating_add(&self.load_time_nanos, load_time.as_nanos() as u64);
    }

    pub fn record_load_failure(&self, load_time: Duration) {
        saturating_add(&self.loads, 1);
        saturating_add(&self.load_failures, 1);
        saturating_add(&self.load_time_nanos, load_time.as_nanos() as u64);
    }

    pub fn record_removal(&self, cause: RemovalCause) {
        let counter = match cause {
            RemovalCause::Size => &self.evictions_size,
            RemovalCause::Weight => &self.evictions_weight,
            RemovalCause::Expired => &self.evictions_expired,
            RemovalCause::Explicit => &self.evictions_explicit,
            RemovalCause::Replaced => &self.evictions_replaced,
            RemovalCause::Collected => &self.evictions_collected,
            RemovalCause::Migrated => &self.evictions_migrated,
        };
        saturating_add(counter, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            total_load_time: Duration::from_nanos(self.load_time_nanos.load(Ordering::Relaxed)),
            evictions_size: self.evictions_size.load(Ordering::Relaxed),
            evictions_weight: self.evictions_weight.load(Ordering::Relaxed),
            evictions_expired: self.evictions_expired.load(Ordering::Relaxed),
            evictions_explicit: self.evictions_explicit.load(Ordering::Relaxed),
            evictions_replaced: self.evictions_replaced.load(Ordering::Relaxed),
            evictions_collected: self.evictions_collected.load(Ordering::Relaxed),
            evictions_migrated: self.evictions_migrated.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one cache's counters.
///
/// Reading is lock-free; individual counters are monotone but the snapshot
/// as a whole may be slightly inconsistent under concurrent updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lookups that returned a live value.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Loader invocations, successful or not.
    pub loads: u64,
    /// Loader invocations that failed.
    pub load_failures: u64,
    /// Total wall time spent in loaders.
    pub total_load_time: Duration,
    /// Evictions under the entry-count bound.
    pub evictions_size: u64,
    /// Evictions under the aggregate-weight bound.
    pub evictions_weight: u64,
    /// Removals of expired entries.
    pub evictions_expired: u64,
    /// Explicit removes and clears.
    pub evictions_explicit: u64,
    /// Replacements by `put` over an existing key.
    pub evictions_replaced: u64,
    /// Reference-cleared removals; not produced by the in-memory store.
    pub evictions_collected: u64,
    /// Entries moved to another node by rebalancing.
    pub evictions_migrated: u64,
}

impl StatsSnapshot {
    /// Requests that hit or missed.
    pub fn request_count(&self) -> u64 {
        self.hits.saturating_add(self.misses)
    }

    /// Hit rate in `[0, 1]`; 0 when no requests were recorded.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            0.0
        } else {
            self.hits as f64 / requests as f64
        }
    }

    /// Miss rate in `[0, 1]`; 0 when no requests were recorded.
    pub fn miss_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            0.0
        } else {
            self.misses as f64 / requests as f64
        }
    }

    /// Mean loader latency; zero when no loads were recorded.
    pub fn average_load_time(&self) -> Duration {
        if self.loads == 0 {
            Duration::ZERO
        } else {
            self.total_load_time / self.loads as u32
        }
    }

    /// Total evictions across all causes except explicit removal.
    pub fn eviction_count(&self) -> u64 {
        self.evictions_size
            .saturating_add(self.evictions_weight)
            .saturating_add(self.evictions_expired)
            .saturating_add(self.evictions_collected)
            .saturating_add(self.evictions_migrated)
    }
}
