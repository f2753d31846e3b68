//! # Sharded Store
//!
//! The concurrent map behind every cache instance. Keys hash to one of N
//! shards (power of two); each shard owns an independent map, an entry
//! arena, an eviction policy, and a bounded read journal. Hits take the
//! shard read lock; writes take the shard write lock; there is no global
//! lock.
//!
//! ## Structure Overview
//!
//! ```text
//! ShardedStore
//!   └── shards: Vec<Shard>
//!         └── Shard
//!               ├── inner: RwLock<ShardInner>
//!               │     ├── map: HashMap<K, u32>
//!               │     ├── slots: Vec<Option<CacheEntry>>
//!               │     ├── free: Vec<u32>
//!               │     └── policy: Box<dyn EvictionPolicy>
//!               └── journal: Mutex<VecDeque<K>>   (bounded, drop-oldest)
//! ```

use std::collections::HashMap as StdHashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::RandomState;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};

use lkv_common::{LatticeError, LatticeResult};

use crate::entry::{CacheEntry, EntryView};
use crate::listener::{CacheEvent, EventQueue, RemovalCause};
use crate::policy::{make_policy, EvictionPolicy, PolicyKind};
use crate::stats::StatsCounters;

/// Default shard count floor; raised to hardware parallelism when higher.
const DEFAULT_MIN_SHARDS: usize = 16;

/// Default per-shard read-journal capacity.
pub(crate) const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

/// Fallback policy sizing for unbounded stores.
const UNBOUNDED_POLICY_CAPACITY: u64 = 1024;

/// Weigher callback; returns the weight charged for an entry.
pub(crate) type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// Construction knobs for the store, produced by the builder.
#[derive(Debug, Clone)]
pub(crate) struct StoreConfig {
    pub shard_count: usize,
    pub initial_capacity: usize,
    pub max_entries: Option<u64>,
    pub max_weight: Option<u64>,
    pub expire_after_write: Option<Duration>,
    pub expire_after_access: Option<Duration>,
    pub refresh_after_write: Option<Duration>,
    pub policy: PolicyKind,
    pub journal_capacity: usize,
    pub access_events: bool,
    pub record_stats: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            shard_count: default_shard_count(),
            initial_capacity: 0,
            max_entries: None,
            max_weight: None,
            expire_after_write: None,
            expire_after_access: None,
            refresh_after_write: None,
            policy: PolicyKind::default(),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            access_events: false,
            record_stats: true,
        }
    }
}

/// Default shard count: at least 16, scaled to hardware parallelism.
pub(crate) fn default_shard_count() -> usize {
    let threads = std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    threads.max(DEFAULT_MIN_SHARDS)
}

/// Per-shard storage container.
struct ShardInner<K, V> {
    /// Key -> arena slot for O(1) lookup.
    map: HashMap<K, u32, RandomState>,
    /// Dense entry arena; policies link slots, not pointers.
    slots: Vec<Option<CacheEntry<K, V>>>,
    /// Free-list for recycling arena slots.
    free: Vec<u32>,
    /// Victim selection state for this shard.
    policy: Box<dyn EvictionPolicy>,
}

impl<K, V> ShardInner<K, V>
where
    K: Eq + Hash,
{
    fn new(hash_state: RandomState, policy: Box<dyn EvictionPolicy>, capacity: usize) -> Self {
        ShardInner {
            map: HashMap::with_capacity_and_hasher(capacity, hash_state),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            policy,
        }
    }

    /// Inserts a new entry and returns its slot.
    fn insert_new(&mut self, entry: CacheEntry<K, V>) -> u32
    where
        K: Clone,
    {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
        };
        self.map.insert(entry.key.clone(), slot);
        self.slots[slot as usize] = Some(entry);
        slot
    }

    /// Removes a slot, detaching it from the map, policy, and arena.
    fn remove_slot(&mut self, slot: u32) -> Option<CacheEntry<K, V>> {
        let entry = self.slots[slot as usize].take()?;
        self.policy.on_remove(slot);
        self.map.remove(&entry.key);
        self.free.push(slot);
        Some(entry)
    }
}

struct Shard<K, V> {
    inner: RwLock<ShardInner<K, V>>,
    /// Bounded journal of read keys, replayed by the maintenance worker.
    journal: Mutex<std::collections::VecDeque<K>>,
}

/// Pending refresh-ahead work, deduplicated by key.
struct RefreshState<K> {
    pending: std::collections::VecDeque<K>,
    queued: HashSet<K>,
}

/// Sharded, bounded, TTL-aware concurrent store.
pub(crate) struct ShardedStore<K, V> {
    shards: Vec<Shard<K, V>>,
    shard_mask: usize,
    /// Hash family for shard selection.
    shard_state: RandomState,
    /// Independent hash family for policy and sketch addressing.
    ref_state: RandomState,
    max_entries: Option<u64>,
    max_weight: Option<u64>,
    weigher: Option<Weigher<K, V>>,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    refresh_after_write: Option<Duration>,
    /// Store epoch; entry timestamps are nanoseconds since this instant.
    epoch: Instant,
    len: AtomicUsize,
    weight: AtomicU64,
    stats: Arc<StatsCounters>,
    events: Arc<EventQueue<K, V>>,
    /// Skip event queueing entirely when no listeners are registered.
    events_enabled: bool,
    access_events: bool,
    record_stats: bool,
    journal_capacity: usize,
    eviction_cursor: AtomicUsize,
    refresh: Mutex<RefreshState<K>>,
}

impl<K, V> ShardedStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    pub fn new(
        config: StoreConfig,
        weigher: Option<Weigher<K, V>>,
        stats: Arc<StatsCounters>,
        events: Arc<EventQueue<K, V>>,
        events_enabled: bool,
    ) -> Self {
        let shard_count = normalize_shard_count(config.shard_count);
        let per_shard_capacity = config
            .max_entries
            .map(|max| (max / shard_count as u64).max(1))
            .unwrap_or(UNBOUNDED_POLICY_CAPACITY);
        let initial = config.initial_capacity / shard_count;

        let shard_state = RandomState::new();
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(Shard {
                inner: RwLock::new(ShardInner::new(
                    shard_state.clone(),
                    make_policy(config.policy, per_shard_capacity),
                    initial,
                )),
                journal: Mutex::new(std::collections::VecDeque::new()),
            });
        }

        ShardedStore {
            shards,
            shard_mask: shard_count - 1,
            shard_state,
            ref_state: RandomState::new(),
            max_entries: config.max_entries,
            max_weight: config.max_weight,
            weigher,
            expire_after_write: config.expire_after_write,
            expire_after_access: config.expire_after_access,
            refresh_after_write: config.refresh_after_write,
            epoch: Instant::now(),
            len: AtomicUsize::new(0),
            weight: AtomicU64::new(0),
            stats,
            events,
            events_enabled,
            access_events: config.access_events,
            record_stats: config.record_stats,
            journal_capacity: config.journal_capacity,
            eviction_cursor: AtomicUsize::new(0),
            refresh: Mutex::new(RefreshState {
                pending: std::collections::VecDeque::new(),
                queued: HashSet::new(),
            }),
        }
    }

    /// Nanoseconds since the store epoch.
    pub fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn shard_index(&self, key: &K) -> usize {
        let mut hasher = self.shard_state.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        &self.shards[self.shard_index(key)]
    }

    /// Policy/sketch hash, independent from shard selection.
    fn ref_hash(&self, key: &K) -> u64 {
        let mut hasher = self.ref_state.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn weigh(&self, key: &K, value: &V) -> u64 {
        match &self.weigher {
            Some(weigher) => weigher(key, value),
            None => 1,
        }
    }

    /// Looks up a live value, recording hit/miss and deferring policy work.
    ///
    /// An expired entry found here is removed with cause `Expired` and
    /// reported as a miss.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = self.now_nanos();
        let shard = self.shard_for(key);

        let mut found_expired = false;
        {
            let inner = shard.inner.read();
            if let Some(&slot) = inner.map.get(key) {
                let entry = inner.slots[slot as usize].as_ref().expect("slot occupied");
                if entry.is_expired(now, self.expire_after_write, self.expire_after_access) {
                    found_expired = true;
                } else {
                    entry.record_access(now);
                    let value = Arc::clone(&entry.value);
                    let wants_refresh = entry.needs_refresh(now, self.refresh_after_write);
                    drop(inner);

                    self.push_journal(shard, key.clone());
                    if wants_refresh {
                        self.schedule_refresh(key);
                    }
                    if self.record_stats {
                        self.stats.record_hit();
                    }
                    if self.events_enabled && self.access_events {
                        self.events.push(CacheEvent::Hit { key: key.clone() });
                    }
                    return Some(value);
                }
            }
        }

        if found_expired {
            self.remove_if_expired(key);
        }

        if self.record_stats {
            self.stats.record_miss();
        }
        if self.events_enabled && self.access_events {
            self.events.push(CacheEvent::Miss { key: key.clone() });
        }
        None
    }

    /// Installs a value, replacing any live entry for the key.
    ///
    /// Bounds are enforced synchronously before returning; eviction order
    /// is deterministic for a given policy state.
    pub fn put(&self, key: K, value: V, weight_override: Option<u64>) -> LatticeResult<()> {
        self.put_shared(key, Arc::new(value), weight_override)
    }

    /// `put` for values that are already shared (loader and refresh paths).
    pub fn put_shared(
        &self,
        key: K,
        value: Arc<V>,
        weight_override: Option<u64>,
    ) -> LatticeResult<()> {
        let weight = weight_override.unwrap_or_else(|| self.weigh(&key, &value));
        if let Some(max_weight) = self.max_weight {
            if weight > max_weight {
                return Err(LatticeError::CapacityExceeded);
            }
        }

        let now = self.now_nanos();
        let key_hash = self.ref_hash(&key);
        let shard = self.shard_for(&key);

        let mut removed: Option<(CacheEntry<K, V>, RemovalCause)> = None;
        {
            let mut inner = shard.inner.write();

            // An expired incumbent is a removal, not a replacement.
            if let Some(&slot) = inner.map.get(&key) {
                let expired = inner.slots[slot as usize]
                    .as_ref()
                    .map(|entry| {
                        entry.is_expired(now, self.expire_after_write, self.expire_after_access)
                    })
                    .unwrap_or(false);
                if expired {
                    removed = inner
                        .remove_slot(slot)
                        .map(|entry| (entry, RemovalCause::Expired));
                }
            }

            if let Some(&slot) = inner.map.get(&key) {
                let entry = inner.slots[slot as usize].as_mut().expect("slot occupied");
                let old_value = Arc::clone(&entry.value);
                let old_weight = entry.weight;
                entry.replace(Arc::clone(&value), weight, now);
                inner.policy.on_access(slot, key_hash);

                if weight >= old_weight {
                    self.weight.fetch_add(weight - old_weight, Ordering::Relaxed);
                } else {
                    self.weight.fetch_sub(old_weight - weight, Ordering::Relaxed);
                }
                if self.record_stats {
                    self.stats.record_removal(RemovalCause::Replaced);
                }
                if self.events_enabled {
                    self.events.push(CacheEvent::Removal {
                        key: key.clone(),
                        value: old_value,
                        cause: RemovalCause::Replaced,
                    });
                    self.events.push(CacheEvent::Put {
                        key: key.clone(),
                        value: Arc::clone(&value),
                    });
                }
            } else {
                let entry = CacheEntry::new(key.clone(), Arc::clone(&value), weight, now);
                let slot = inner.insert_new(entry);
                inner.policy.on_add(slot, key_hash);
                self.len.fetch_add(1, Ordering::Relaxed);
                self.weight.fetch_add(weight, Ordering::Relaxed);
                if self.events_enabled {
                    self.events.push(CacheEvent::Put {
                        key,
                        value: Arc::clone(&value),
                    });
                }
            }
        }

        if let Some((entry, cause)) = removed {
            self.finish_removal(entry, cause);
        }
        self.enforce_bounds();
        Ok(())
    }

    /// Removes a key explicitly, returning the prior live value.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.remove_with_cause(key, RemovalCause::Explicit)
    }

    /// Removes a key for the given cause.
    ///
    /// The cluster layer uses cause `Migrated` when streaming entries to a
    /// new owner. An expired incumbent is reported as `Expired` and treated
    /// as already missing.
    pub fn remove_with_cause(&self, key: &K, cause: RemovalCause) -> Option<Arc<V>> {
        let now = self.now_nanos();
        let shard = self.shard_for(key);

        let (entry, expired) = {
            let mut inner = shard.inner.write();
            let slot = match inner.map.get(key) {
                Some(&slot) => slot,
                None => return None,
            };
            let expired = inner.slots[slot as usize]
                .as_ref()
                .map(|entry| entry.is_expired(now, self.expire_after_write, self.expire_after_access))
                .unwrap_or(false);
            (inner.remove_slot(slot), expired)
        };

        let entry = entry?;
        let value = Arc::clone(&entry.value);
        if expired {
            self.finish_removal(entry, RemovalCause::Expired);
            None
        } else {
            self.finish_removal(entry, cause);
            Some(value)
        }
    }

    /// Looks up a live value without touching stats, journal, or events.
    ///
    /// Used by the loader path to double-check under flight leadership.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        let now = self.now_nanos();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        let &slot = inner.map.get(key)?;
        let entry = inner.slots[slot as usize].as_ref()?;
        if entry.is_expired(now, self.expire_after_write, self.expire_after_access) {
            None
        } else {
            Some(Arc::clone(&entry.value))
        }
    }

    /// True when a live (non-expired) entry exists for the key.
    pub fn contains(&self, key: &K) -> bool {
        let now = self.now_nanos();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        match inner.map.get(key) {
            Some(&slot) => inner.slots[slot as usize]
                .as_ref()
                .map(|entry| !entry.is_expired(now, self.expire_after_write, self.expire_after_access))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Entry count, including entries awaiting the expiration sweep.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Aggregate weight, including entries awaiting the expiration sweep.
    pub fn total_weight(&self) -> u64 {
        self.weight.load(Ordering::Relaxed)
    }

    /// Fetches all live values for the given keys.
    pub fn get_all<I>(&self, keys: I) -> StdHashMap<K, Arc<V>>
    where
        I: IntoIterator<Item = K>,
        K: Eq + Hash,
    {
        let mut found = StdHashMap::new();
        for key in keys {
            if let Some(value) = self.get(&key) {
                found.insert(key, value);
            }
        }
        found
    }

    /// Installs every pair; bounds are enforced as each entry lands.
    pub fn put_all<I>(&self, pairs: I) -> LatticeResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in pairs {
            self.put(key, value, None)?;
        }
        Ok(())
    }

    /// Removes everything with cause `Explicit`.
    pub fn clear(&self) {
        for shard in &self.shards {
            let drained: Vec<CacheEntry<K, V>> = {
                let mut inner = shard.inner.write();
                let entries = inner
                    .slots
                    .iter_mut()
                    .filter_map(|slot| slot.take())
                    .collect();
                inner.map.clear();
                inner.free.clear();
                inner.slots.clear();
                inner.policy.clear();
                entries
            };
            shard.journal.lock().clear();
            for entry in drained {
                self.finish_removal(entry, RemovalCause::Explicit);
            }
        }
    }

    /// Metadata view for diagnostics; `None` when absent or expired.
    pub fn entry_view(&self, key: &K) -> Option<EntryView<V>> {
        let now = self.now_nanos();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        let &slot = inner.map.get(key)?;
        let entry = inner.slots[slot as usize].as_ref()?;
        if entry.is_expired(now, self.expire_after_write, self.expire_after_access) {
            return None;
        }
        Some(EntryView {
            value: Arc::clone(&entry.value),
            weight: entry.weight,
            age: Duration::from_nanos(now.saturating_sub(entry.created_nanos)),
            idle: Duration::from_nanos(now.saturating_sub(entry.accessed_nanos())),
            access_count: entry.access_count(),
        })
    }

    /// Snapshot of all keys, for migration planning.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let inner = shard.inner.read();
            keys.extend(inner.map.keys().cloned());
        }
        keys
    }

    /// Exports a live entry as (value, remaining write TTL) for migration.
    pub fn export_entry(&self, key: &K) -> Option<(Arc<V>, Option<Duration>)> {
        let now = self.now_nanos();
        let shard = self.shard_for(key);
        let inner = shard.inner.read();
        let &slot = inner.map.get(key)?;
        let entry = inner.slots[slot as usize].as_ref()?;
        if entry.is_expired(now, self.expire_after_write, self.expire_after_access) {
            return None;
        }
        Some((
            Arc::clone(&entry.value),
            entry.remaining_write_ttl(now, self.expire_after_write),
        ))
    }

    /// Sweeps expired entries across all shards; returns the removal count.
    pub fn sweep_expired(&self) -> usize {
        let now = self.now_nanos();
        let mut removed = 0;
        for shard in &self.shards {
            let drained: Vec<CacheEntry<K, V>> = {
                let mut inner = shard.inner.write();
                let expired: Vec<u32> = inner
                    .map
                    .values()
                    .copied()
                    .filter(|&slot| {
                        inner.slots[slot as usize]
                            .as_ref()
                            .map(|entry| {
                                entry.is_expired(
                                    now,
                                    self.expire_after_write,
                                    self.expire_after_access,
                                )
                            })
                            .unwrap_or(false)
                    })
                    .collect();
                expired
                    .into_iter()
                    .filter_map(|slot| inner.remove_slot(slot))
                    .collect()
            };
            for entry in drained {
                self.finish_removal(entry, RemovalCause::Expired);
                removed += 1;
            }
        }
        removed
    }

    /// Replays journaled reads into the shard policies.
    ///
    /// Runs on the maintenance worker; user reads only append.
    pub fn drain_journals(&self) -> usize {
        let mut applied = 0;
        for shard in &self.shards {
            let drained: Vec<K> = {
                let mut journal = shard.journal.lock();
                journal.drain(..).collect()
            };
            if drained.is_empty() {
                continue;
            }
            let mut inner = shard.inner.write();
            for key in drained {
                if let Some(&slot) = inner.map.get(&key) {
                    let key_hash = self.ref_hash(&key);
                    inner.policy.on_access(slot, key_hash);
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Takes up to `max` keys scheduled for refresh-ahead.
    pub fn take_refresh_batch(&self, max: usize) -> Vec<K> {
        let mut refresh = self.refresh.lock();
        let take = refresh.pending.len().min(max);
        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(key) = refresh.pending.pop_front() {
                refresh.queued.remove(&key);
                batch.push(key);
            }
        }
        batch
    }

    fn schedule_refresh(&self, key: &K) {
        let mut refresh = self.refresh.lock();
        if refresh.queued.insert(key.clone()) {
            refresh.pending.push_back(key.clone());
        }
    }

    /// Appends a read record, dropping the oldest when the journal is full.
    fn push_journal(&self, shard: &Shard<K, V>, key: K) {
        let mut journal = shard.journal.lock();
        if journal.len() >= self.journal_capacity {
            journal.pop_front();
        }
        journal.push_back(key);
    }

    /// Removes the entry for `key` if it is still expired under the write
    /// lock.
    fn remove_if_expired(&self, key: &K) {
        let now = self.now_nanos();
        let shard = self.shard_for(key);
        let entry = {
            let mut inner = shard.inner.write();
            let slot = match inner.map.get(key) {
                Some(&slot) => slot,
                None => return,
            };
            let still_expired = inner.slots[slot as usize]
                .as_ref()
                .map(|entry| entry.is_expired(now, self.expire_after_write, self.expire_after_access))
                .unwrap_or(false);
            if !still_expired {
                return;
            }
            inner.remove_slot(slot)
        };
        if let Some(entry) = entry {
            self.finish_removal(entry, RemovalCause::Expired);
        }
    }

    /// Global accounting, stats, and events for one removed entry.
    fn finish_removal(&self, entry: CacheEntry<K, V>, cause: RemovalCause) {
        self.len.fetch_sub(1, Ordering::Relaxed);
        self.weight.fetch_sub(entry.weight, Ordering::Relaxed);
        if self.record_stats {
            self.stats.record_removal(cause);
        }
        if self.events_enabled {
            self.events.push(CacheEvent::Removal {
                key: entry.key,
                value: entry.value,
                cause,
            });
        }
    }

    /// Evicts until both bounds hold, rotating across shards.
    ///
    /// Runs after the insert lock is released so eviction never holds two
    /// shard locks at once.
    fn enforce_bounds(&self) {
        loop {
            let over_size = self
                .max_entries
                .map(|max| self.len.load(Ordering::Relaxed) as u64 > max)
                .unwrap_or(false);
            let over_weight = self
                .max_weight
                .map(|max| self.weight.load(Ordering::Relaxed) > max)
                .unwrap_or(false);
            if !over_size && !over_weight {
                break;
            }
            let cause = if over_size {
                RemovalCause::Size
            } else {
                RemovalCause::Weight
            };

            let start = self.eviction_cursor.fetch_add(1, Ordering::Relaxed);
            let mut evicted = false;
            for offset in 0..self.shards.len() {
                let idx = (start + offset) & self.shard_mask;
                if self.evict_one(idx, cause) {
                    evicted = true;
                    break;
                }
            }
            if !evicted {
                break;
            }
        }
    }

    /// Evicts one policy victim from a shard, if it has any entries.
    fn evict_one(&self, shard_index: usize, cause: RemovalCause) -> bool {
        let entry = {
            let mut inner = self.shards[shard_index].inner.write();
            match inner.policy.select_victim() {
                Some(victim) => inner.remove_slot(victim),
                None => None,
            }
        };
        match entry {
            Some(entry) => {
                self.finish_removal(entry, cause);
                true
            }
            None => false,
        }
    }
}

/// Normalizes shard counts to a power of two for mask-based selection.
fn normalize_shard_count(count: usize) -> usize {
    count.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(config: StoreConfig) -> ShardedStore<String, u64> {
        ShardedStore::new(
            config,
            None,
            Arc::new(StatsCounters::default()),
            Arc::new(EventQueue::new()),
            false,
        )
    }

    fn bounded(max_entries: u64, shards: usize, policy: PolicyKind) -> ShardedStore<String, u64> {
        store(StoreConfig {
            shard_count: shards,
            max_entries: Some(max_entries),
            policy,
            ..StoreConfig::default()
        })
    }

    #[test]
    fn put_get_roundtrip() {
        let store = store(StoreConfig::default());
        store.put("alpha".into(), 7, None).unwrap();
        assert_eq!(store.get(&"alpha".into()).as_deref(), Some(&7));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_returns_prior_value() {
        let store = store(StoreConfig::default());
        store.put("alpha".into(), 7, None).unwrap();
        assert_eq!(store.remove(&"alpha".into()).as_deref(), Some(&7));
        assert_eq!(store.remove(&"alpha".into()), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn size_bound_holds_after_every_put() {
        let store = bounded(8, 4, PolicyKind::Lru);
        for i in 0..100 {
            store.put(format!("k{i}"), i, None).unwrap();
            assert!(store.len() <= 8);
        }
    }

    #[test]
    fn lru_evicts_in_insertion_order_single_shard() {
        let store = bounded(3, 1, PolicyKind::Lru);
        for i in 0..5 {
            store.put(format!("k{i}"), i, None).unwrap();
        }
        assert!(store.get(&"k0".into()).is_none());
        assert!(store.get(&"k1".into()).is_none());
        assert!(store.get(&"k2".into()).is_some());
        assert!(store.get(&"k4".into()).is_some());
    }

    #[test]
    fn weight_bound_evicts_and_refuses_oversize() {
        let weigher: Weigher<String, u64> = Arc::new(|_key, value| *value);
        let store = ShardedStore::new(
            StoreConfig {
                shard_count: 1,
                max_weight: Some(10),
                policy: PolicyKind::Lru,
                ..StoreConfig::default()
            },
            Some(weigher),
            Arc::new(StatsCounters::default()),
            Arc::new(EventQueue::new()),
            false,
        );

        store.put("a".into(), 4, None).unwrap();
        store.put("b".into(), 4, None).unwrap();
        store.put("c".into(), 4, None).unwrap();
        assert!(store.total_weight() <= 10);
        assert!(store.get(&"a".into()).is_none());

        assert!(matches!(
            store.put("huge".into(), 11, None),
            Err(LatticeError::CapacityExceeded)
        ));
        assert!(!store.contains(&"huge".into()));
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let store = store(StoreConfig {
            shard_count: 1,
            expire_after_write: Some(Duration::from_millis(20)),
            ..StoreConfig::default()
        });
        store.put("alpha".into(), 1, None).unwrap();
        assert!(store.get(&"alpha".into()).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(store.get(&"alpha".into()).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn sweep_removes_expired_proactively() {
        let stats = Arc::new(StatsCounters::default());
        let store: ShardedStore<String, u64> = ShardedStore::new(
            StoreConfig {
                shard_count: 2,
                expire_after_write: Some(Duration::from_millis(10)),
                ..StoreConfig::default()
            },
            None,
            Arc::clone(&stats),
            Arc::new(EventQueue::new()),
            false,
        );
        store.put("a".into(), 1, None).unwrap();
        store.put("b".into(), 2, None).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.sweep_expired(), 2);
        assert_eq!(store.len(), 0);
        assert_eq!(stats.snapshot().evictions_expired, 2);
    }

    #[test]
    fn replace_reports_replaced_and_updates_weight() {
        let weigher: Weigher<String, u64> = Arc::new(|_key, value| *value);
        let stats = Arc::new(StatsCounters::default());
        let store = ShardedStore::new(
            StoreConfig {
                shard_count: 1,
                max_weight: Some(100),
                ..StoreConfig::default()
            },
            Some(weigher),
            Arc::clone(&stats),
            Arc::new(EventQueue::new()),
            false,
        );
        store.put("a".into(), 10, None).unwrap();
        store.put("a".into(), 3, None).unwrap();
        assert_eq!(store.total_weight(), 3);
        assert_eq!(store.len(), 1);
        assert_eq!(stats.snapshot().evictions_replaced, 1);
    }

    #[test]
    fn clear_is_idempotent() {
        let store = store(StoreConfig::default());
        store.put("a".into(), 1, None).unwrap();
        store.put("b".into(), 2, None).unwrap();
        store.clear();
        assert_eq!(store.len(), 0);
        store.clear();
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_weight(), 0);
    }

    #[test]
    fn get_all_and_put_all_batch() {
        let store = store(StoreConfig::default());
        store
            .put_all((0..10).map(|i| (format!("k{i}"), i)))
            .unwrap();
        let found = store.get_all((0..20).map(|i| format!("k{i}")));
        assert_eq!(found.len(), 10);
        assert_eq!(found.get("k3").map(|v| **v), Some(3));
    }

    #[test]
    fn journal_drops_oldest_when_full() {
        let store = store(StoreConfig {
            shard_count: 1,
            journal_capacity: 4,
            ..StoreConfig::default()
        });
        for i in 0..4 {
            store.put(format!("k{i}"), i, None).unwrap();
        }
        for _ in 0..3 {
            for i in 0..4 {
                store.get(&format!("k{i}"));
            }
        }
        // Capacity 4: only the newest four records survive.
        assert_eq!(store.drain_journals(), 4);
    }

    #[test]
    fn drained_reads_reorder_lru() {
        let store = bounded(3, 1, PolicyKind::Lru);
        store.put("a".into(), 0, None).unwrap();
        store.put("b".into(), 1, None).unwrap();
        store.put("c".into(), 2, None).unwrap();

        store.get(&"a".into());
        store.drain_journals();

        store.put("d".into(), 3, None).unwrap();
        assert!(store.get(&"b".into()).is_none());
        assert!(store.get(&"a".into()).is_some());
    }

    #[test]
    fn refresh_scheduling_dedups() {
        let store = store(StoreConfig {
            shard_count: 1,
            refresh_after_write: Some(Duration::from_millis(1)),
            ..StoreConfig::default()
        });
        store.put("a".into(), 1, None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.get(&"a".into());
        store.get(&"a".into());
        let batch = store.take_refresh_batch(16);
        assert_eq!(batch, vec!["a".to_string()]);
        assert!(store.take_refresh_batch(16).is_empty());
    }

    #[test]
    fn export_entry_reports_remaining_ttl() {
        let store = store(StoreConfig {
            shard_count: 1,
            expire_after_write: Some(Duration::from_secs(60)),
            ..StoreConfig::default()
        });
        store.put("a".into(), 9, None).unwrap();
        let (value, ttl) = store.export_entry(&"a".into()).unwrap();
        assert_eq!(*value, 9);
        assert!(ttl.unwrap() <= Duration::from_secs(60));
        assert!(ttl.unwrap() > Duration::from_secs(59));
    }
}
