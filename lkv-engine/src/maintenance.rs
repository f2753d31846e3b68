//! # Maintenance Worker
//!
//! One background thread per cache. It replays read journals into the
//! eviction policies, sweeps expired entries, executes refresh-ahead
//! reloads, and delivers listener events. User-visible operations never
//! block on it beyond appending a bounded record.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::cache::CacheCore;
use crate::listener::CacheEvent;
use crate::loader::{load_failure_from, FlightRole};

/// Default interval between maintenance cycles.
pub(crate) const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Maximum refresh-ahead reloads per cycle.
const REFRESH_BATCH: usize = 64;

/// Handle for the background worker.
///
/// Stopping runs one final cycle so queued events and journals flush
/// before the thread exits.
pub(crate) struct MaintenanceHandle {
    stop: Arc<AtomicBool>,
    wake: Arc<(Mutex<()>, Condvar)>,
    join: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Signals shutdown and waits for the final flush.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        self.wake.1.notify_all();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawns the worker thread for a cache core.
pub(crate) fn spawn_worker<K, V>(
    core: Arc<CacheCore<K, V>>,
    tick: Duration,
) -> MaintenanceHandle
where
    K: Eq + std::hash::Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let tick = if tick.is_zero() { DEFAULT_TICK } else { tick };
    let stop = Arc::new(AtomicBool::new(false));
    let wake = Arc::new((Mutex::new(()), Condvar::new()));

    let stop_thread = Arc::clone(&stop);
    let wake_thread = Arc::clone(&wake);
    let join = std::thread::Builder::new()
        .name(format!("lkv-maint-{}", core.name))
        .spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                {
                    let mut guard = wake_thread.0.lock();
                    wake_thread.1.wait_for(&mut guard, tick);
                }
                if stop_thread.load(Ordering::Acquire) {
                    break;
                }
                run_cycle(&core);
            }
            // Final flush: journals, pending refreshes, and queued events.
            run_cycle(&core);
            deliver_events(&core);
        })
        .expect("spawn maintenance worker");

    MaintenanceHandle {
        stop,
        wake,
        join: Some(join),
    }
}

/// One housekeeping pass.
pub(crate) fn run_cycle<K, V>(core: &CacheCore<K, V>)
where
    K: Eq + std::hash::Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    let applied = core.store.drain_journals();
    let swept = core.store.sweep_expired();
    if swept > 0 {
        debug!(cache = %core.name, swept, applied, "expiration sweep");
    }
    run_refreshes(core);
    deliver_events(core);
}

/// Executes scheduled refresh-ahead reloads under single-flight.
fn run_refreshes<K, V>(core: &CacheCore<K, V>)
where
    K: Eq + std::hash::Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    let loader = match &core.loader {
        Some(loader) => Arc::clone(loader),
        None => return,
    };

    for key in core.store.take_refresh_batch(REFRESH_BATCH) {
        match core.flight.join(&key) {
            // A user load is already running; its result supersedes ours.
            FlightRole::Follower(_) => continue,
            FlightRole::Leader(guard) => {
                let start = Instant::now();
                match loader.load(&key) {
                    Ok(value) => {
                        let value = Arc::new(value);
                        let elapsed = start.elapsed();
                        if let Err(err) =
                            core.store.put_shared(key.clone(), Arc::clone(&value), None)
                        {
                            warn!(cache = %core.name, error = %err, "refresh install failed");
                        }
                        if core.record_stats {
                            core.stats.record_load_success(elapsed);
                        }
                        if core.events_enabled {
                            core.events.push(CacheEvent::LoadSuccess {
                                key: key.clone(),
                                load_time: elapsed,
                            });
                        }
                        core.flight.complete(&key, guard, Ok(value));
                    }
                    Err(err) => {
                        // The stale value stays readable until it expires.
                        let failure = load_failure_from(&err);
                        if core.record_stats {
                            core.stats.record_load_failure(start.elapsed());
                        }
                        if core.events_enabled {
                            core.events.push(CacheEvent::LoadFailure {
                                key: key.clone(),
                                error: failure.to_string(),
                            });
                        }
                        warn!(cache = %core.name, error = %failure, "refresh load failed");
                        core.flight.complete(&key, guard, Err(failure));
                    }
                }
            }
        }
    }
}

/// Drains the event queue and invokes every listener per event.
///
/// Listener panics are contained and logged; delivery of the remaining
/// events continues.
fn deliver_events<K, V>(core: &CacheCore<K, V>)
where
    K: Eq + std::hash::Hash + Clone + Send + Sync,
    V: Send + Sync,
{
    if core.listeners.is_empty() {
        return;
    }
    for event in core.events.drain() {
        for listener in &core.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if outcome.is_err() {
                warn!(cache = %core.name, "event listener panicked");
            }
        }
    }
}
