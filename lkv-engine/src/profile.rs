//! # Cache Profiles
//!
//! Declarative mapping from workload characteristics to a concrete
//! (engine variant, eviction policy, default knobs) triple. The registry
//! is an explicit value passed to the builder; tests substitute their own
//! registries without global teardown.

use std::time::Duration;

use hashbrown::HashMap;

use crate::policy::PolicyKind;

/// Dominant access pattern of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPattern {
    /// No structure in the key stream.
    #[default]
    Uniform,
    /// Recently used keys are reused soon.
    Temporal,
    /// Neighbouring keys are used together.
    Spatial,
    /// Keys are consumed in order, rarely revisited.
    Sequential,
    /// Popularity follows a heavy-tailed distribution.
    Zipfian,
}

/// How tight memory is for the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryConstraint {
    /// Memory is plentiful.
    Unconstrained,
    /// Ordinary budgeting applies.
    #[default]
    Normal,
    /// Every megabyte is contended.
    Limited,
}

/// Expected concurrency of callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyDemand {
    /// Single-threaded or nearly so.
    Low,
    /// A handful of threads.
    #[default]
    Medium,
    /// Many threads hammering the cache.
    High,
}

/// Workload description consumed by profile selection.
#[derive(Debug, Clone)]
pub struct WorkloadCharacteristics {
    /// Reads per write; `>= 0`.
    pub read_to_write_ratio: f64,
    /// Dominant access pattern.
    pub access_pattern: AccessPattern,
    /// Memory pressure.
    pub memory_constraint: MemoryConstraint,
    /// Caller concurrency.
    pub concurrency_level: ConcurrencyDemand,
    /// Whether cluster-consistent behavior is required.
    pub requires_consistency: bool,
    /// Whether the caller drives the cache from async contexts.
    pub requires_async: bool,
    /// Expected number of live entries.
    pub expected_size: u64,
    /// Target hit rate in `[0, 1]`.
    pub hit_rate_expectation: f64,
}

impl Default for WorkloadCharacteristics {
    fn default() -> Self {
        WorkloadCharacteristics {
            read_to_write_ratio: 1.0,
            access_pattern: AccessPattern::default(),
            memory_constraint: MemoryConstraint::default(),
            concurrency_level: ConcurrencyDemand::default(),
            requires_consistency: false,
            requires_async: false,
            expected_size: 10_000,
            hit_rate_expectation: 0.8,
        }
    }
}

/// Coarse grouping of profiles, mirroring how they are documented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileCategory {
    /// General-purpose profiles.
    Core,
    /// Profiles tuned for one niche (sessions, APIs, compute).
    Specialized,
    /// Profiles that assume specific hardware or latency budgets.
    Advanced,
    /// Profiles that imply cluster mode.
    Distributed,
}

/// Closed enumeration of engine variants a profile can select.
///
/// Variants tune store construction (shard counts, journal sizing,
/// initial capacity); the operation set is identical across all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineVariant {
    /// Balanced defaults.
    #[default]
    Standard,
    /// Bigger journals and more shards for read-dominated load.
    ReadOptimized,
    /// Smaller journals; writes dominate so deferred reads are few.
    WriteOptimized,
    /// Minimal footprint: fewer shards, tight initial capacity.
    Compact,
    /// Maximum parallelism: shards scaled well past core count.
    Throughput,
}

/// Suitability check a profile applies to a workload.
pub type SuitabilityFn = fn(&WorkloadCharacteristics) -> bool;

/// An immutable profile record.
#[derive(Debug, Clone)]
pub struct CacheProfile {
    /// Unique registry key.
    pub name: &'static str,
    /// Documentation grouping.
    pub category: ProfileCategory,
    /// Engine variant to construct.
    pub variant: EngineVariant,
    /// Default eviction policy.
    pub policy: PolicyKind,
    /// Default entry bound; `None` leaves the cache unbounded.
    pub default_max_entries: Option<u64>,
    /// Default write-relative TTL.
    pub default_expire_after_write: Option<Duration>,
    /// Default access-relative TTL.
    pub default_expire_after_access: Option<Duration>,
    /// Default shard-count hint; `None` uses the store default.
    pub default_concurrency: Option<usize>,
    /// Workload acceptance predicate.
    pub suits: SuitabilityFn,
    /// Selection priority; highest accepted profile wins.
    pub priority: i32,
}

/// Name of the fallback profile every registry carries.
pub const DEFAULT_PROFILE: &str = "default";

/// Registry of profiles, keyed by name.
///
/// Registration is idempotent: re-registering a name replaces the record.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<&'static str, CacheProfile>,
}

impl ProfileRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        ProfileRegistry::default()
    }

    /// Creates a registry pre-populated with the built-in profiles.
    pub fn with_builtins() -> Self {
        let mut registry = ProfileRegistry::new();
        for profile in builtin_profiles() {
            registry.register(profile);
        }
        registry
    }

    /// Registers (or replaces) a profile under its name.
    pub fn register(&mut self, profile: CacheProfile) {
        self.profiles.insert(profile.name, profile);
    }

    /// Exact lookup by name.
    pub fn get(&self, name: &str) -> Option<&CacheProfile> {
        self.profiles.get(name)
    }

    /// Number of registered profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// True when no profiles are registered.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Picks the highest-priority profile accepting the workload, falling
    /// back to `default`.
    pub fn select_for(&self, workload: &WorkloadCharacteristics) -> &CacheProfile {
        self.profiles
            .values()
            .filter(|profile| profile.name != DEFAULT_PROFILE && (profile.suits)(workload))
            .max_by_key(|profile| profile.priority)
            .or_else(|| self.profiles.get(DEFAULT_PROFILE))
            .expect("registry carries a default profile")
    }
}

/// The built-in profile set.
fn builtin_profiles() -> Vec<CacheProfile> {
    vec![
        CacheProfile {
            name: "default",
            category: ProfileCategory::Core,
            variant: EngineVariant::Standard,
            policy: PolicyKind::TinyLfu,
            default_max_entries: Some(10_000),
            default_expire_after_write: None,
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |_| true,
            priority: 0,
        },
        CacheProfile {
            name: "read_heavy",
            category: ProfileCategory::Core,
            variant: EngineVariant::ReadOptimized,
            policy: PolicyKind::TinyLfu,
            default_max_entries: Some(50_000),
            default_expire_after_write: None,
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| w.read_to_write_ratio >= 5.0,
            priority: 10,
        },
        CacheProfile {
            name: "write_heavy",
            category: ProfileCategory::Core,
            variant: EngineVariant::WriteOptimized,
            policy: PolicyKind::Lru,
            default_max_entries: Some(10_000),
            default_expire_after_write: None,
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| w.read_to_write_ratio < 1.0,
            priority: 10,
        },
        CacheProfile {
            name: "memory_efficient",
            category: ProfileCategory::Core,
            variant: EngineVariant::Compact,
            policy: PolicyKind::Lru,
            default_max_entries: Some(1_000),
            default_expire_after_write: None,
            default_expire_after_access: Some(Duration::from_secs(300)),
            default_concurrency: Some(4),
            suits: |w| w.memory_constraint == MemoryConstraint::Limited,
            priority: 20,
        },
        CacheProfile {
            name: "high_performance",
            category: ProfileCategory::Core,
            variant: EngineVariant::Throughput,
            policy: PolicyKind::TinyLfu,
            default_max_entries: Some(100_000),
            default_expire_after_write: None,
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| {
                w.concurrency_level == ConcurrencyDemand::High
                    && w.memory_constraint == MemoryConstraint::Unconstrained
            },
            priority: 15,
        },
        CacheProfile {
            name: "session",
            category: ProfileCategory::Specialized,
            variant: EngineVariant::Standard,
            policy: PolicyKind::Lru,
            default_max_entries: Some(10_000),
            default_expire_after_write: None,
            default_expire_after_access: Some(Duration::from_secs(30 * 60)),
            default_concurrency: None,
            suits: |w| w.access_pattern == AccessPattern::Temporal,
            priority: 5,
        },
        CacheProfile {
            name: "api",
            category: ProfileCategory::Specialized,
            variant: EngineVariant::Standard,
            policy: PolicyKind::TinyLfu,
            default_max_entries: Some(20_000),
            default_expire_after_write: Some(Duration::from_secs(60)),
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| w.read_to_write_ratio >= 2.0 && w.hit_rate_expectation >= 0.5,
            priority: 5,
        },
        CacheProfile {
            name: "compute",
            category: ProfileCategory::Specialized,
            variant: EngineVariant::Standard,
            policy: PolicyKind::Lfu,
            default_max_entries: Some(5_000),
            default_expire_after_write: Some(Duration::from_secs(6 * 60 * 60)),
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| w.hit_rate_expectation >= 0.9,
            priority: 5,
        },
        CacheProfile {
            name: "ml_optimized",
            category: ProfileCategory::Advanced,
            variant: EngineVariant::ReadOptimized,
            policy: PolicyKind::TinyLfu,
            default_max_entries: Some(50_000),
            default_expire_after_write: None,
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| w.access_pattern == AccessPattern::Zipfian,
            priority: 8,
        },
        CacheProfile {
            name: "zero_copy",
            category: ProfileCategory::Advanced,
            variant: EngineVariant::Compact,
            policy: PolicyKind::Fifo,
            default_max_entries: Some(10_000),
            default_expire_after_write: None,
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| w.access_pattern == AccessPattern::Sequential,
            priority: 8,
        },
        CacheProfile {
            name: "hardware_optimized",
            category: ProfileCategory::Advanced,
            variant: EngineVariant::Throughput,
            policy: PolicyKind::Lru,
            default_max_entries: Some(100_000),
            default_expire_after_write: None,
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| w.concurrency_level == ConcurrencyDemand::High,
            priority: 8,
        },
        CacheProfile {
            name: "distributed",
            category: ProfileCategory::Distributed,
            variant: EngineVariant::Standard,
            policy: PolicyKind::TinyLfu,
            default_max_entries: Some(100_000),
            default_expire_after_write: None,
            default_expire_after_access: None,
            default_concurrency: None,
            suits: |w| w.requires_consistency,
            priority: 25,
        },
    ]
}
