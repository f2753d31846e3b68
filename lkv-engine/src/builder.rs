//! # Cache Builder
//!
//! Validating construction API. Explicit settings always win; a profile
//! (picked by name or from workload characteristics) only fills knobs the
//! caller left unset.

use std::hash::Hash;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use lkv_common::{LatticeError, LatticeResult};

use crate::cache::{Cache, CacheCore};
use crate::listener::{EventListener, EventQueue};
use crate::loader::{CacheLoader, FlightGroup};
use crate::maintenance::DEFAULT_TICK;
use crate::policy::PolicyKind;
use crate::profile::{CacheProfile, EngineVariant, ProfileRegistry, WorkloadCharacteristics};
use crate::stats::StatsCounters;
use crate::store::{
    default_shard_count, ShardedStore, StoreConfig, Weigher, DEFAULT_JOURNAL_CAPACITY,
};

/// Builder for [`Cache`] instances.
pub struct CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    name: Option<String>,
    max_entries: Option<u64>,
    max_weight: Option<u64>,
    weigher: Option<Weigher<K, V>>,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    refresh_after_write: Option<Duration>,
    record_stats: bool,
    concurrency: Option<usize>,
    initial_capacity: usize,
    listeners: Vec<Arc<dyn EventListener<K, V>>>,
    access_events: bool,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    policy: Option<PolicyKind>,
    profile: Option<CacheProfile>,
    weak_keys: bool,
    weak_values: bool,
    soft_values: bool,
    maintenance_tick: Duration,
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Starts a builder with no bounds and default knobs.
    pub fn new() -> Self {
        CacheBuilder {
            name: None,
            max_entries: None,
            max_weight: None,
            weigher: None,
            expire_after_write: None,
            expire_after_access: None,
            refresh_after_write: None,
            record_stats: true,
            concurrency: None,
            initial_capacity: 0,
            listeners: Vec::new(),
            access_events: false,
            loader: None,
            policy: None,
            profile: None,
            weak_keys: false,
            weak_values: false,
            soft_values: false,
            maintenance_tick: DEFAULT_TICK,
        }
    }

    /// Names the cache; shows up in logs and worker thread names.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bounds the entry count.
    pub fn maximum_size(mut self, max_entries: u64) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Bounds the aggregate weight; requires a weigher.
    pub fn maximum_weight(mut self, max_weight: u64) -> Self {
        self.max_weight = Some(max_weight);
        self
    }

    /// Sets the weigher charged per entry.
    pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u64 + Send + Sync + 'static) -> Self {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Expires entries a fixed duration after their last write.
    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    /// Expires entries a fixed duration after their last access.
    pub fn expire_after_access(mut self, ttl: Duration) -> Self {
        self.expire_after_access = Some(ttl);
        self
    }

    /// Schedules background reloads for entries older than `refresh`.
    ///
    /// Requires a loader; must be shorter than `expire_after_write` when
    /// both are set.
    pub fn refresh_after_write(mut self, refresh: Duration) -> Self {
        self.refresh_after_write = Some(refresh);
        self
    }

    /// Enables or disables statistics recording (enabled by default).
    pub fn record_stats(mut self, enabled: bool) -> Self {
        self.record_stats = enabled;
        self
    }

    /// Hints the shard count; normalized to a power of two.
    pub fn concurrency_level(mut self, shards: usize) -> Self {
        self.concurrency = Some(shards);
        self
    }

    /// Pre-sizes the shard maps.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Registers an event listener.
    pub fn listener(mut self, listener: impl EventListener<K, V> + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Also surface hit/miss events to listeners (off by default).
    pub fn access_events(mut self, enabled: bool) -> Self {
        self.access_events = enabled;
        self
    }

    /// Configures the synchronous loader invoked on misses.
    pub fn loader(mut self, loader: impl CacheLoader<K, V> + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Overrides the eviction policy.
    pub fn eviction_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Applies a named profile's defaults to unset knobs.
    pub fn profile(mut self, registry: &ProfileRegistry, name: &str) -> LatticeResult<Self> {
        match registry.get(name) {
            Some(profile) => {
                self.profile = Some(profile.clone());
                Ok(self)
            }
            None => Err(LatticeError::InvalidConfiguration(format!(
                "unknown profile: {name}"
            ))),
        }
    }

    /// Selects a profile from workload characteristics.
    pub fn workload(mut self, registry: &ProfileRegistry, workload: &WorkloadCharacteristics) -> Self {
        self.profile = Some(registry.select_for(workload).clone());
        self
    }

    /// Requests GC-style weak keys. Rejected at build time; bounded
    /// eviction and TTL replace reference-based reclamation here.
    pub fn weak_keys(mut self, enabled: bool) -> Self {
        self.weak_keys = enabled;
        self
    }

    /// Requests GC-style weak values. Rejected at build time.
    pub fn weak_values(mut self, enabled: bool) -> Self {
        self.weak_values = enabled;
        self
    }

    /// Requests GC-style soft values. Rejected at build time.
    pub fn soft_values(mut self, enabled: bool) -> Self {
        self.soft_values = enabled;
        self
    }

    /// Overrides the maintenance cycle interval.
    pub fn maintenance_tick(mut self, tick: Duration) -> Self {
        self.maintenance_tick = tick;
        self
    }

    /// Validates the configuration and constructs the cache.
    pub fn build(mut self) -> LatticeResult<Cache<K, V>> {
        self.validate()?;
        self.apply_profile();

        let variant = self
            .profile
            .as_ref()
            .map(|profile| profile.variant)
            .unwrap_or_default();
        let (shards, journal_capacity) = variant_knobs(variant, self.concurrency);

        let config = StoreConfig {
            shard_count: shards,
            initial_capacity: self.initial_capacity,
            max_entries: self.max_entries,
            max_weight: self.max_weight,
            expire_after_write: self.expire_after_write,
            expire_after_access: self.expire_after_access,
            refresh_after_write: self.refresh_after_write,
            policy: self.policy.unwrap_or_default(),
            journal_capacity,
            access_events: self.access_events,
            record_stats: self.record_stats,
        };

        let stats = Arc::new(StatsCounters::default());
        let events = Arc::new(EventQueue::new());
        let events_enabled = !self.listeners.is_empty();
        let store = ShardedStore::new(
            config,
            self.weigher.take(),
            Arc::clone(&stats),
            Arc::clone(&events),
            events_enabled,
        );

        let core = CacheCore {
            name: self.name.unwrap_or_else(|| "lattice-cache".to_string()),
            store,
            stats,
            events,
            events_enabled,
            record_stats: self.record_stats,
            listeners: self.listeners,
            loader: self.loader,
            flight: FlightGroup::new(),
            closed: AtomicBool::new(false),
        };
        Ok(Cache::from_core(core, self.maintenance_tick))
    }

    fn validate(&self) -> LatticeResult<()> {
        if self.weak_keys || self.weak_values || self.soft_values {
            return Err(invalid(
                "weak/soft references are not supported; use TTL or bounded eviction",
            ));
        }
        if self.max_weight.is_some() && self.weigher.is_none() {
            return Err(invalid("maximum_weight requires a weigher"));
        }
        if self.weigher.is_some() && self.max_weight.is_none() {
            return Err(invalid("weigher requires maximum_weight"));
        }
        if self.concurrency == Some(0) {
            return Err(invalid("concurrency_level must be positive"));
        }
        if self.refresh_after_write.is_some() && self.loader.is_none() {
            return Err(invalid("refresh_after_write requires a loader"));
        }
        if let (Some(refresh), Some(ttl)) = (self.refresh_after_write, self.expire_after_write) {
            if refresh >= ttl {
                return Err(invalid("refresh_after_write must be shorter than expire_after_write"));
            }
        }
        Ok(())
    }

    /// Fills unset knobs from the selected profile.
    fn apply_profile(&mut self) {
        let profile = match &self.profile {
            Some(profile) => profile,
            None => return,
        };
        if self.policy.is_none() {
            self.policy = Some(profile.policy);
        }
        if self.max_entries.is_none() {
            self.max_entries = profile.default_max_entries;
        }
        if self.expire_after_write.is_none() {
            self.expire_after_write = profile.default_expire_after_write;
        }
        if self.expire_after_access.is_none() {
            self.expire_after_access = profile.default_expire_after_access;
        }
        if self.concurrency.is_none() {
            self.concurrency = profile.default_concurrency;
        }
    }
}

/// Maps an engine variant to (shard count, journal capacity).
fn variant_knobs(variant: EngineVariant, explicit_shards: Option<usize>) -> (usize, usize) {
    let base = default_shard_count();
    let (shards, journal) = match variant {
        EngineVariant::Standard => (base, DEFAULT_JOURNAL_CAPACITY),
        EngineVariant::ReadOptimized => (base * 2, DEFAULT_JOURNAL_CAPACITY * 4),
        EngineVariant::WriteOptimized => (base, DEFAULT_JOURNAL_CAPACITY / 4),
        EngineVariant::Compact => (4, DEFAULT_JOURNAL_CAPACITY / 4),
        EngineVariant::Throughput => (base * 4, DEFAULT_JOURNAL_CAPACITY * 2),
    };
    (explicit_shards.unwrap_or(shards), journal)
}

fn invalid(message: &str) -> LatticeError {
    LatticeError::InvalidConfiguration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_build_succeeds() {
        let cache: Cache<String, u32> = CacheBuilder::new()
            .name("plain")
            .maximum_size(100)
            .build()
            .unwrap();
        assert_eq!(cache.name(), "plain");
        cache.close();
    }

    #[test]
    fn weight_bound_without_weigher_is_rejected() {
        let result: LatticeResult<Cache<String, u32>> =
            CacheBuilder::new().maximum_weight(100).build();
        assert!(matches!(
            result,
            Err(LatticeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn weigher_without_weight_bound_is_rejected() {
        let result: LatticeResult<Cache<String, u32>> = CacheBuilder::new()
            .weigher(|_key, _value| 1)
            .build();
        assert!(matches!(
            result,
            Err(LatticeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn refresh_requires_loader_and_shorter_ttl() {
        let result: LatticeResult<Cache<String, u32>> = CacheBuilder::new()
            .refresh_after_write(Duration::from_secs(1))
            .build();
        assert!(result.is_err());

        let result: LatticeResult<Cache<String, u32>> = CacheBuilder::new()
            .loader(|_key: &String| Ok(1u32))
            .expire_after_write(Duration::from_secs(1))
            .refresh_after_write(Duration::from_secs(2))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn weak_references_are_rejected() {
        let result: LatticeResult<Cache<String, u32>> =
            CacheBuilder::new().weak_values(true).build();
        assert!(matches!(
            result,
            Err(LatticeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result: LatticeResult<Cache<String, u32>> =
            CacheBuilder::new().concurrency_level(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let registry = ProfileRegistry::with_builtins();
        let result = CacheBuilder::<String, u32>::new().profile(&registry, "no_such_profile");
        assert!(result.is_err());
    }

    #[test]
    fn explicit_settings_override_profile_defaults() {
        let registry = ProfileRegistry::with_builtins();
        let cache: Cache<String, u32> = CacheBuilder::new()
            .maximum_size(7)
            .profile(&registry, "read_heavy")
            .unwrap()
            .concurrency_level(1)
            .build()
            .unwrap();
        for i in 0..20 {
            cache.put(format!("k{i}"), i).unwrap();
        }
        // The explicit bound of 7 wins over the profile's 50_000.
        assert!(cache.len() <= 7);
        cache.close();
    }
}
