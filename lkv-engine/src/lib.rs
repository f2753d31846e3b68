//! # LatticeKV Engine
//!
//! Provide the local cache engine: a sharded concurrent store with O(1)
//! eviction policies, TTL-aware lookups, per-key single-flight loading,
//! deferred access bookkeeping, and profile-driven construction.
//!
//! ## Usage
//!
//! - Use [`CacheBuilder`] to construct a [`Cache`] with explicit knobs.
//! - Use a [`ProfileRegistry`] to pick defaults from workload characteristics.
//! - Use [`AsyncCache`] to drive a cache from async contexts.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard read/write locks keep the hot path short.
//! 2. **Deferred Access Updates**: Reads append to a bounded journal; a
//!    background worker replays them into the eviction policy.
//! 3. **Synchronous Bounds**: `put` evicts until size and weight fit, so the
//!    bounds hold whenever the store is at rest.
//! 4. **Arena Handles**: Eviction-list nodes live in index arenas, avoiding
//!    reference cycles between entries and policy state.

mod async_cache;
mod builder;
mod cache;
mod entry;
mod listener;
mod loader;
mod maintenance;
pub mod policy;
mod profile;
mod sketch;
mod stats;
mod store;

pub use async_cache::AsyncCache;
pub use builder::CacheBuilder;
pub use cache::Cache;
pub use entry::EntryView;
pub use listener::{CacheEvent, EventListener, RemovalCause};
pub use loader::CacheLoader;
pub use policy::PolicyKind;
pub use profile::{
    AccessPattern, CacheProfile, ConcurrencyDemand, EngineVariant, MemoryConstraint,
    ProfileCategory, ProfileRegistry, WorkloadCharacteristics,
};
pub use sketch::FrequencySketch;
pub use stats::StatsSnapshot;

pub use lkv_common::{LatticeError, LatticeResult};
