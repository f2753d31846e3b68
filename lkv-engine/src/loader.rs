//! # Loaders and Single-Flight
//!
//! A loader computes values for missing keys. For any key, at most one
//! loader invocation is in flight; concurrent callers for the same key park
//! on the leader's flight and observe its result. Failures are never
//! cached, so the next caller after a failure retries.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use lkv_common::{LatticeError, LatticeResult};

/// Synchronous value loader invoked on cache misses.
pub trait CacheLoader<K, V>: Send + Sync {
    /// Computes the value for `key`. Errors propagate to every caller
    /// waiting on this flight and are not cached.
    fn load(&self, key: &K) -> LatticeResult<V>;
}

impl<K, V, F> CacheLoader<K, V> for F
where
    F: Fn(&K) -> LatticeResult<V> + Send + Sync,
{
    fn load(&self, key: &K) -> LatticeResult<V> {
        self(key)
    }
}

/// Result of one loader invocation, shared with all parked callers.
type FlightResult<V> = LatticeResult<Arc<V>>;

/// One in-flight load.
struct Flight<V> {
    state: Mutex<Option<FlightResult<V>>>,
    done: Condvar,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Flight {
            state: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn complete(&self, result: FlightResult<V>) {
        let mut state = self.state.lock();
        *state = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> FlightResult<V> {
        let mut state = self.state.lock();
        while state.is_none() {
            self.done.wait(&mut state);
        }
        state.as_ref().expect("flight completed").clone()
    }
}

/// Outcome of joining a flight group for a key.
pub(crate) enum FlightRole<V> {
    /// This caller runs the loader and must publish through `complete`.
    Leader(FlightGuard<V>),
    /// Another caller loaded; this is its shared result.
    Follower(FlightResult<V>),
}

/// Leader handle; completing it publishes the result to parked followers.
pub(crate) struct FlightGuard<V> {
    flight: Arc<Flight<V>>,
}

/// Per-key single-flight coordinator.
pub(crate) struct FlightGroup<K, V> {
    flights: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> FlightGroup<K, V>
where
    K: Eq + std::hash::Hash + Clone,
{
    pub fn new() -> Self {
        FlightGroup {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Joins the flight for `key`, becoming the leader when none exists.
    ///
    /// A follower blocks until the leader publishes, then returns the
    /// shared result. The flights mutex is released before waiting.
    pub fn join(&self, key: &K) -> FlightRole<V> {
        let (flight, is_leader) = {
            let mut flights = self.flights.lock();
            match flights.get(key) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    flights.insert(key.clone(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if is_leader {
            FlightRole::Leader(FlightGuard { flight })
        } else {
            FlightRole::Follower(flight.wait())
        }
    }

    /// Publishes the leader's result and retires the key so later misses
    /// start a fresh flight.
    pub fn complete(&self, key: &K, guard: FlightGuard<V>, result: FlightResult<V>) {
        {
            let mut flights = self.flights.lock();
            flights.remove(key);
        }
        guard.flight.complete(result);
    }

    /// True when a flight is currently pending for `key`.
    pub fn is_pending(&self, key: &K) -> bool {
        self.flights.lock().contains_key(key)
    }
}

/// Maps an arbitrary loader error into the canonical load-failure form.
pub(crate) fn load_failure_from(err: &LatticeError) -> LatticeError {
    match err {
        LatticeError::LoadFailure(_) => err.clone(),
        other => LatticeError::load_failure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn leader_then_follower() {
        let group: FlightGroup<&str, u32> = FlightGroup::new();
        let guard = match group.join(&"k") {
            FlightRole::Leader(guard) => guard,
            FlightRole::Follower(_) => panic!("first join must lead"),
        };
        assert!(group.is_pending(&"k"));
        group.complete(&"k", guard, Ok(Arc::new(5)));
        assert!(!group.is_pending(&"k"));
    }

    #[test]
    fn followers_observe_leader_result() {
        let group: Arc<FlightGroup<&'static str, u32>> = Arc::new(FlightGroup::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for _ in 0..8 {
                let group = Arc::clone(&group);
                let invocations = Arc::clone(&invocations);
                handles.push(scope.spawn(move || match group.join(&"k") {
                    FlightRole::Leader(guard) => {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        group.complete(&"k", guard, Ok(Arc::new(42)));
                        42u32
                    }
                    FlightRole::Follower(result) => *result.unwrap(),
                }));
            }
            for handle in handles {
                assert_eq!(handle.join().unwrap(), 42);
            }
        });

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_retires_the_flight() {
        let group: FlightGroup<&str, u32> = FlightGroup::new();
        let guard = match group.join(&"k") {
            FlightRole::Leader(guard) => guard,
            FlightRole::Follower(_) => panic!("first join must lead"),
        };
        group.complete(&"k", guard, Err(LatticeError::load_failure("boom")));

        // The next join leads again; the failure was not cached.
        assert!(matches!(group.join(&"k"), FlightRole::Leader(_)));
    }

    #[test]
    fn load_failure_wrapping_preserves_kind() {
        let err = LatticeError::Timeout;
        assert!(matches!(
            load_failure_from(&err),
            LatticeError::LoadFailure(_)
        ));
        let already = LatticeError::load_failure("x");
        assert!(matches!(
            load_failure_from(&already),
            LatticeError::LoadFailure(_)
        ));
    }
}
