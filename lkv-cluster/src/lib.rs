//! # LatticeKV Cluster
//!
//! Optional cluster mode for the cache engine: a consistent-hash ring with
//! virtual nodes, membership with health transitions and a monotone
//! topology version, an owner-routing layer with selectable consistency,
//! and bounded-batch data movement when the membership view changes. The
//! byte transport is pluggable behind the [`Transport`] trait.

mod membership;
mod migration;
mod ring;
mod router;
pub mod transport;

pub use membership::{
    ClusterMembership, ClusterView, DiscoverySource, MemberInfo, NodeHealth, StaticDiscovery,
};
pub use migration::MigrationReport;
pub use ring::{HashRing, OwnershipChange};
pub use router::DistributedCache;
pub use transport::{BoxFuture, TcpTransport, Transport};

pub use lkv_common::{ConsistencyLevel, DistributedConfig, LatticeError, LatticeResult};
