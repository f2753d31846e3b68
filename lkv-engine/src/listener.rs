//! # Events and Listeners
//!
//! Removal causes and the event surface delivered off the critical path.
//! Producers enqueue; the maintenance worker drains and invokes listeners,
//! so a slow or panicking listener never stalls cache operations.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Evicted under the entry-count bound.
    Size,
    /// Evicted under the aggregate-weight bound.
    Weight,
    /// A configured deadline passed.
    Expired,
    /// Removed by `remove` or `clear`.
    Explicit,
    /// Replaced by a `put` on the same key.
    Replaced,
    /// Reference cleared by shared-ownership observation; unused by the
    /// in-memory store, present for wire and metrics compatibility.
    Collected,
    /// Moved to another node during rebalancing.
    Migrated,
}

impl RemovalCause {
    /// True when the removal was the cache's decision rather than the
    /// caller's.
    pub fn was_evicted(&self) -> bool {
        !matches!(self, RemovalCause::Explicit | RemovalCause::Replaced)
    }
}

/// Events surfaced to listeners.
#[derive(Debug, Clone)]
pub enum CacheEvent<K, V> {
    /// A value was installed.
    Put {
        /// Installed key.
        key: K,
        /// Installed value.
        value: Arc<V>,
    },
    /// A lookup returned a live value. Emitted only when access events are
    /// enabled on the builder.
    Hit {
        /// Looked-up key.
        key: K,
    },
    /// A lookup found nothing usable. Emitted only when access events are
    /// enabled on the builder.
    Miss {
        /// Looked-up key.
        key: K,
    },
    /// An entry left the store.
    Removal {
        /// Removed key.
        key: K,
        /// Removed value.
        value: Arc<V>,
        /// Why it left.
        cause: RemovalCause,
    },
    /// A loader produced a value.
    LoadSuccess {
        /// Loaded key.
        key: K,
        /// Loader wall time.
        load_time: Duration,
    },
    /// A loader failed; the failure is not cached.
    LoadFailure {
        /// Key the loader was invoked for.
        key: K,
        /// Loader error message.
        error: String,
    },
}

/// Callback invoked by the maintenance worker for each drained event.
pub trait EventListener<K, V>: Send + Sync {
    /// Handles one event. Panics are caught and logged; they never affect
    /// the operation that produced the event.
    fn on_event(&self, event: &CacheEvent<K, V>);
}

impl<K, V, F> EventListener<K, V> for F
where
    F: Fn(&CacheEvent<K, V>) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent<K, V>) {
        self(event)
    }
}

/// FIFO event queue shared between shards and the maintenance worker.
///
/// A single queue keeps per-key delivery order identical to operation
/// order.
#[derive(Debug)]
pub(crate) struct EventQueue<K, V> {
    events: Mutex<VecDeque<CacheEvent<K, V>>>,
}

impl<K, V> EventQueue<K, V> {
    pub fn new() -> Self {
        EventQueue {
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, event: CacheEvent<K, V>) {
        self.events.lock().push_back(event);
    }

    /// Takes everything queued so far.
    pub fn drain(&self) -> Vec<CacheEvent<K, V>> {
        let mut events = self.events.lock();
        events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
