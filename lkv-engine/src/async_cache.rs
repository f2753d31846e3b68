//! # Async Facade
//!
//! Wraps a [`Cache`] for async callers. The engine's hot path stays
//! synchronous; operations that may block (shard write locks, loaders) are
//! offloaded to the blocking pool so the async runtime is never stalled.
//!
//! Cancellation is cooperative: dropping a returned future stops waiting,
//! but an in-flight loader completes and installs its value.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use lkv_common::{LatticeError, LatticeResult};

use crate::cache::Cache;
use crate::stats::StatsSnapshot;

/// Async handle over a shared [`Cache`].
#[derive(Clone)]
pub struct AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    inner: Arc<Cache<K, V>>,
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Wraps an existing cache.
    pub fn new(cache: Cache<K, V>) -> Self {
        AsyncCache {
            inner: Arc::new(cache),
        }
    }

    /// Wraps an already-shared cache.
    pub fn from_shared(cache: Arc<Cache<K, V>>) -> Self {
        AsyncCache { inner: cache }
    }

    /// The underlying synchronous cache.
    pub fn sync(&self) -> &Cache<K, V> {
        &self.inner
    }

    /// Async `get`; per-key ordering matches the sync facade.
    pub async fn get(&self, key: K) -> LatticeResult<Option<Arc<V>>> {
        let cache = Arc::clone(&self.inner);
        run_blocking(move || cache.get(&key)).await
    }

    /// Async `get` bounded by `timeout`.
    ///
    /// Expiry returns [`LatticeError::Timeout`]; a loader that is already
    /// running is not interrupted and will still install its value.
    pub async fn get_timeout(&self, key: K, timeout: Duration) -> LatticeResult<Option<Arc<V>>> {
        let cache = Arc::clone(&self.inner);
        match tokio::time::timeout(timeout, run_blocking(move || cache.get(&key))).await {
            Ok(result) => result,
            Err(_) => Err(LatticeError::Timeout),
        }
    }

    /// Async `get_or_load` with the same single-flight guarantee.
    pub async fn get_or_load<F>(&self, key: K, load: F) -> LatticeResult<Arc<V>>
    where
        F: FnOnce(&K) -> LatticeResult<V> + Send + 'static,
    {
        let cache = Arc::clone(&self.inner);
        run_blocking(move || cache.get_or_load(&key, load)).await
    }

    /// Async `put`.
    pub async fn put(&self, key: K, value: V) -> LatticeResult<()>
    where
        V: 'static,
    {
        let cache = Arc::clone(&self.inner);
        run_blocking(move || cache.put(key, value)).await
    }

    /// Async `remove`.
    pub async fn remove(&self, key: K) -> LatticeResult<Option<Arc<V>>> {
        let cache = Arc::clone(&self.inner);
        run_blocking(move || cache.remove(&key)).await
    }

    /// Async `get_all`.
    pub async fn get_all(&self, keys: Vec<K>) -> LatticeResult<HashMap<K, Arc<V>>> {
        let cache = Arc::clone(&self.inner);
        run_blocking(move || cache.get_all(keys)).await
    }

    /// Async `put_all`.
    pub async fn put_all(&self, pairs: Vec<(K, V)>) -> LatticeResult<()>
    where
        V: 'static,
    {
        let cache = Arc::clone(&self.inner);
        run_blocking(move || cache.put_all(pairs)).await
    }

    /// Async `clear`.
    pub async fn clear(&self) -> LatticeResult<()> {
        let cache = Arc::clone(&self.inner);
        run_blocking(move || cache.clear()).await
    }

    /// Statistics snapshot; lock-free, no offload needed.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats()
    }

    /// Closes the underlying cache.
    pub fn close(&self) {
        self.inner.close();
    }
}

/// Offloads a blocking closure; a vanished blocking task maps to
/// `Cancelled`.
async fn run_blocking<T, F>(f: F) -> LatticeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> LatticeResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(_) => Err(LatticeError::Cancelled),
    }
}
