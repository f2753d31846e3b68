//! # Distributed Configuration
//!
//! Knobs for cluster mode. Local cache construction lives in the engine's
//! builder; this struct only covers what routing and transport need.

use std::time::Duration;

/// Default number of virtual nodes inserted per physical node.
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// Consistency level applied to routed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistencyLevel {
    /// Single-owner writes and reads; owner failure fails the operation.
    #[default]
    Eventual,
    /// Same caller sticks to one owner for a bounded window.
    Session,
    /// Owner-only reads/writes; refuse to serve during topology transitions.
    Strong,
}

/// Configuration for a cluster node.
#[derive(Debug, Clone)]
pub struct DistributedConfig {
    /// Cluster name; nodes only peer within the same cluster.
    pub cluster_name: String,
    /// This node's stable identifier.
    pub node_id: String,
    /// Virtual nodes per physical node on the hash ring.
    pub virtual_nodes_per_node: usize,
    /// Upper bound on cache memory for this node, in bytes (0 = unbounded).
    pub max_memory_per_node: u64,
    /// Consistency level for routed operations.
    pub consistency_level: ConsistencyLevel,
    /// Per-operation network timeout.
    pub network_timeout: Duration,
    /// Grace window a suspected node keeps ring ownership.
    pub suspicion_grace: Duration,
    /// Enable read repair on replica divergence.
    pub enable_read_repair: bool,
    /// Maximum entries per migration batch.
    pub migration_batch_size: usize,
    /// Maximum frame size accepted and produced by the transport.
    pub max_frame_bytes: usize,
    /// Bounded retry attempts for transient routing failures.
    pub max_retries: u32,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        DistributedConfig {
            cluster_name: "lattice".to_string(),
            node_id: "node-0".to_string(),
            virtual_nodes_per_node: DEFAULT_VIRTUAL_NODES,
            max_memory_per_node: 0,
            consistency_level: ConsistencyLevel::Eventual,
            network_timeout: Duration::from_secs(5),
            suspicion_grace: Duration::from_secs(10),
            enable_read_repair: false,
            migration_batch_size: 512,
            max_frame_bytes: crate::proto::DEFAULT_MAX_FRAME_BYTES,
            max_retries: 3,
        }
    }
}

impl DistributedConfig {
    /// Builds a config for a named node with defaults elsewhere.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        DistributedConfig {
            node_id: node_id.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DistributedConfig::default();
        assert_eq!(config.virtual_nodes_per_node, DEFAULT_VIRTUAL_NODES);
        assert_eq!(config.consistency_level, ConsistencyLevel::Eventual);
        assert!(config.max_retries > 0);
        assert!(config.migration_batch_size > 0);
    }

    #[test]
    fn for_node_sets_id() {
        let config = DistributedConfig::for_node("node-7");
        assert_eq!(config.node_id, "node-7");
        assert_eq!(config.cluster_name, "lattice");
    }
}
