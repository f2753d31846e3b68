//! Node server binary. Configuration comes from environment variables so
//! the core stays free of CLI machinery:
//!
//! - `LKV_NODE_ID`     node identifier (default `node-0`)
//! - `LKV_LISTEN`      listen address (default `127.0.0.1:7401`)
//! - `LKV_SEEDS`       comma-separated `node_id=addr` seed pairs
//! - `LKV_MAX_MEMORY`  per-node byte budget, 0 = unbounded

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lkv_cluster::transport::TcpTransport;
use lkv_cluster::{ClusterMembership, DiscoverySource, DistributedCache, StaticDiscovery};
use lkv_common::proto::DEFAULT_MAX_FRAME_BYTES;
use lkv_common::DistributedConfig;
use lkv_server::{build_local_cache, NodeServer};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_seeds(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (node, addr) = pair.split_once('=')?;
            Some((node.trim().to_string(), addr.trim().to_string()))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let node_id = env_or("LKV_NODE_ID", "node-0");
    let listen = env_or("LKV_LISTEN", "127.0.0.1:7401");
    let seeds = parse_seeds(&env_or("LKV_SEEDS", ""));
    let max_memory: u64 = env_or("LKV_MAX_MEMORY", "0")
        .parse()
        .context("LKV_MAX_MEMORY must be an integer")?;

    let mut config = DistributedConfig::for_node(node_id.clone());
    config.max_memory_per_node = max_memory;

    let local = Arc::new(build_local_cache(&config)?);
    let membership = Arc::new(ClusterMembership::new(config.suspicion_grace));
    let discovery = StaticDiscovery::new(seeds);
    membership.bootstrap(&discovery);
    info!(seeds = discovery.seeds().len(), "membership bootstrapped");

    let transport = Arc::new(TcpTransport::with_limits(
        config.network_timeout,
        config.max_frame_bytes,
        4,
    ));
    let node = Arc::new(DistributedCache::new(
        config,
        local,
        membership,
        transport,
    ));
    node.register_self(&listen);

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    let server = Arc::new(NodeServer::new(node, DEFAULT_MAX_FRAME_BYTES));
    server.serve(listener).await.context("accept loop failed")
}
