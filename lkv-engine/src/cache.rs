//! # Cache Facade
//!
//! The public handle over the sharded store, statistics, loader, and
//! maintenance worker. A cache must be closed; `Drop` closes as a
//! fallback so resources are released on every path.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::info;

use lkv_common::{LatticeError, LatticeResult};

use crate::entry::EntryView;
use crate::listener::{CacheEvent, EventListener, EventQueue, RemovalCause};
use crate::loader::{load_failure_from, CacheLoader, FlightGroup, FlightRole};
use crate::maintenance::{spawn_worker, MaintenanceHandle};
use crate::stats::{StatsCounters, StatsSnapshot};
use crate::store::ShardedStore;

/// Shared state between the facade and the maintenance worker.
pub(crate) struct CacheCore<K, V> {
    pub name: String,
    pub store: ShardedStore<K, V>,
    pub stats: Arc<StatsCounters>,
    pub events: Arc<EventQueue<K, V>>,
    pub events_enabled: bool,
    pub record_stats: bool,
    pub listeners: Vec<Arc<dyn EventListener<K, V>>>,
    pub loader: Option<Arc<dyn CacheLoader<K, V>>>,
    pub flight: FlightGroup<K, V>,
    pub closed: AtomicBool,
}

/// A local cache instance.
///
/// Constructed through [`crate::CacheBuilder`]; all operations are
/// thread-safe. Values are handed out as `Arc<V>` so readers never copy
/// the payload.
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    core: Arc<CacheCore<K, V>>,
    worker: Mutex<Option<MaintenanceHandle>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn from_core(core: CacheCore<K, V>, tick: std::time::Duration) -> Self {
        let core = Arc::new(core);
        let worker = spawn_worker(Arc::clone(&core), tick);
        Cache {
            core,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The cache's configured name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    fn ensure_open(&self) -> LatticeResult<()> {
        if self.core.closed.load(Ordering::Acquire) {
            Err(LatticeError::Closed)
        } else {
            Ok(())
        }
    }

    /// Returns the live value for `key`.
    ///
    /// On a miss with a configured loader, loads under the per-key
    /// single-flight guarantee, installs the result, and returns it. Loader
    /// failures surface as [`LatticeError::LoadFailure`] and are not
    /// cached.
    pub fn get(&self, key: &K) -> LatticeResult<Option<Arc<V>>> {
        self.ensure_open()?;
        if let Some(value) = self.core.store.get(key) {
            return Ok(Some(value));
        }
        match &self.core.loader {
            Some(loader) => {
                let loader = Arc::clone(loader);
                self.load_with(key, |key| loader.load(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Returns the value for `key`, computing it with `load` when absent.
    ///
    /// The same single-flight guarantee applies: concurrent callers for one
    /// key share a single invocation, whichever loader they passed.
    pub fn get_or_load<F>(&self, key: &K, load: F) -> LatticeResult<Arc<V>>
    where
        F: FnOnce(&K) -> LatticeResult<V>,
    {
        self.ensure_open()?;
        if let Some(value) = self.core.store.get(key) {
            return Ok(value);
        }
        let mut load = Some(load);
        self.load_with(key, move |key| {
            (load.take().expect("loader invoked once"))(key)
        })
    }

    /// Installs a value, evicting synchronously if bounds are exceeded.
    pub fn put(&self, key: K, value: V) -> LatticeResult<()> {
        self.ensure_open()?;
        self.core.store.put(key, value, None)
    }

    /// Installs a value with an explicit weight, bypassing the weigher.
    pub fn put_with_weight(&self, key: K, value: V, weight: u64) -> LatticeResult<()> {
        self.ensure_open()?;
        self.core.store.put(key, value, Some(weight))
    }

    /// Removes and returns the prior live value, if any.
    pub fn remove(&self, key: &K) -> LatticeResult<Option<Arc<V>>> {
        self.ensure_open()?;
        Ok(self.core.store.remove(key))
    }

    /// Removes a key for an explicit cause; used by the cluster layer when
    /// entries migrate to a new owner.
    pub fn remove_with_cause(&self, key: &K, cause: RemovalCause) -> LatticeResult<Option<Arc<V>>> {
        self.ensure_open()?;
        Ok(self.core.store.remove_with_cause(key, cause))
    }

    /// True when a live entry exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        !self.core.closed.load(Ordering::Acquire) && self.core.store.contains(key)
    }

    /// Current entry count (may include entries awaiting the sweep).
    pub fn len(&self) -> usize {
        self.core.store.len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current aggregate weight.
    pub fn weight(&self) -> u64 {
        self.core.store.total_weight()
    }

    /// Lock-free statistics snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Metadata view of one live entry.
    pub fn entry_view(&self, key: &K) -> Option<EntryView<V>> {
        self.core.store.entry_view(key)
    }

    /// Fetches all live values for the given keys.
    ///
    /// Missing keys are absent from the result; no loader is invoked.
    pub fn get_all<I>(&self, keys: I) -> LatticeResult<HashMap<K, Arc<V>>>
    where
        I: IntoIterator<Item = K>,
    {
        self.ensure_open()?;
        Ok(self.core.store.get_all(keys))
    }

    /// Installs every pair, enforcing bounds as each entry lands.
    pub fn put_all<I>(&self, pairs: I) -> LatticeResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.ensure_open()?;
        self.core.store.put_all(pairs)
    }

    /// Removes every entry with cause `Explicit`.
    pub fn clear(&self) -> LatticeResult<()> {
        self.ensure_open()?;
        self.core.store.clear();
        Ok(())
    }

    /// Snapshot of all keys; used by migration planning.
    pub fn keys(&self) -> Vec<K> {
        self.core.store.keys()
    }

    /// Exports a live entry as (value, remaining write TTL).
    pub fn export_entry(&self, key: &K) -> Option<(Arc<V>, Option<std::time::Duration>)> {
        self.core.store.export_entry(key)
    }

    /// True once `close` has run.
    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    /// Runs one maintenance cycle on the caller's thread: replays journaled
    /// reads into the policies, sweeps expired entries, executes pending
    /// refreshes, and delivers queued events.
    ///
    /// The background worker does the same periodically; this is for
    /// callers that need the bookkeeping applied at a known point.
    pub fn maintain(&self) {
        crate::maintenance::run_cycle(&self.core);
    }

    /// Closes the cache: rejects new operations, flushes listener events,
    /// and stops the maintenance worker.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn close(&self) {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.stop();
        }
        info!(cache = %self.core.name, "cache closed");
    }

    /// Runs the loader as flight leader or adopts an in-flight result.
    fn load_with<F>(&self, key: &K, mut load: F) -> LatticeResult<Arc<V>>
    where
        F: FnMut(&K) -> LatticeResult<V>,
    {
        match self.core.flight.join(key) {
            FlightRole::Follower(result) => result,
            FlightRole::Leader(guard) => {
                // Double-check under leadership: a completed flight may have
                // installed the value between our miss and taking the lead.
                if let Some(value) = self.core.store.peek(key) {
                    self.core
                        .flight
                        .complete(key, guard, Ok(Arc::clone(&value)));
                    return Ok(value);
                }
                let start = Instant::now();
                match load(key) {
                    Ok(value) => {
                        let value = Arc::new(value);
                        let elapsed = start.elapsed();
                        let install = self
                            .core
                            .store
                            .put_shared(key.clone(), Arc::clone(&value), None);
                        if self.core.record_stats {
                            self.core.stats.record_load_success(elapsed);
                        }
                        if self.core.events_enabled {
                            self.core.events.push(CacheEvent::LoadSuccess {
                                key: key.clone(),
                                load_time: elapsed,
                            });
                        }
                        let result = match install {
                            Ok(()) => Ok(Arc::clone(&value)),
                            // Oversized loads surface the refusal but still
                            // hand the computed value to parked callers.
                            Err(LatticeError::CapacityExceeded) => Ok(Arc::clone(&value)),
                            Err(err) => Err(err),
                        };
                        self.core.flight.complete(key, guard, result.clone());
                        result
                    }
                    Err(err) => {
                        let failure = load_failure_from(&err);
                        if self.core.record_stats {
                            self.core.stats.record_load_failure(start.elapsed());
                        }
                        if self.core.events_enabled {
                            self.core.events.push(CacheEvent::LoadFailure {
                                key: key.clone(),
                                error: failure.to_string(),
                            });
                        }
                        self.core
                            .flight
                            .complete(key, guard, Err(failure.clone()));
                        Err(failure)
                    }
                }
            }
        }
    }
}

impl<K, V> Drop for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.close();
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.core.name)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
