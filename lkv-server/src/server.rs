//! # TCP Node Server
//!
//! Accept wire-protocol connections, decode length-prefixed frames, and
//! dispatch requests to the distributed router with minimal overhead.

use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use lkv_cluster::transport::{read_frame, write_frame};
use lkv_cluster::DistributedCache;
use lkv_common::proto::{Request, Response, Status};
use lkv_common::{DistributedConfig, LatticeError, LatticeResult};
use lkv_engine::{Cache, CacheBuilder};

use crate::metrics::ServerMetrics;

/// Builds the local engine cache for a node from its distributed config.
///
/// `max_memory_per_node` becomes a byte-weight bound with a key+value
/// weigher; zero leaves the cache unbounded.
pub fn build_local_cache(config: &DistributedConfig) -> LatticeResult<Cache<Vec<u8>, Vec<u8>>> {
    let builder = CacheBuilder::new().name(format!("{}-local", config.node_id));
    if config.max_memory_per_node > 0 {
        builder
            .maximum_weight(config.max_memory_per_node)
            .weigher(|key: &Vec<u8>, value: &Vec<u8>| (key.len() + value.len()) as u64)
            .build()
    } else {
        builder.build()
    }
}

/// TCP front end for one cluster node.
pub struct NodeServer {
    node: Arc<DistributedCache>,
    metrics: Arc<ServerMetrics>,
    max_frame: usize,
}

impl NodeServer {
    /// Creates a server over an existing node.
    pub fn new(node: Arc<DistributedCache>, max_frame: usize) -> Self {
        NodeServer {
            node,
            metrics: Arc::new(ServerMetrics::new()),
            max_frame,
        }
    }

    /// The server's metrics aggregator.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Accept loop; spawns one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(
            node = self.node.node_id(),
            addr = %listener.local_addr()?,
            "node server listening"
        );
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "connection accepted");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    debug!(%peer, error = %err, "connection closed with error");
                }
            });
        }
    }

    /// Handles a single connection until EOF or a framing error.
    pub async fn handle_connection(&self, mut stream: TcpStream) -> LatticeResult<()> {
        loop {
            let frame = match read_frame(&mut stream, self.max_frame).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(LatticeError::PayloadTooLarge { size, limit }) => {
                    // The request id is unreadable; answer with id 0 and
                    // drop the connection since the stream is desynced.
                    self.metrics.record_error();
                    let response = Response::status(0, Status::PayloadTooLarge);
                    let payload = serde_json::to_vec(&response)?;
                    let _ = write_frame(&mut stream, &payload, self.max_frame).await;
                    return Err(LatticeError::PayloadTooLarge { size, limit });
                }
                Err(err) => return Err(err),
            };

            let request: Request = match serde_json::from_slice(&frame) {
                Ok(request) => request,
                Err(err) => {
                    self.metrics.record_error();
                    warn!(error = %err, "undecodable request frame");
                    let response = Response::status(0, Status::InternalError);
                    let payload = serde_json::to_vec(&response)?;
                    write_frame(&mut stream, &payload, self.max_frame).await?;
                    continue;
                }
            };

            self.metrics.record_request_start();
            let start = Instant::now();
            let response = self.node.handle_request(request);
            if !matches!(response.status, Status::Ok | Status::NotFound) {
                self.metrics.record_error();
            }
            let payload = serde_json::to_vec(&response)?;
            let written = write_frame(&mut stream, &payload, self.max_frame).await;
            self.metrics.record_request_end(start.elapsed());
            written?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_cache_honors_memory_bound() {
        let mut config = DistributedConfig::for_node("n1");
        config.max_memory_per_node = 64;
        let cache = build_local_cache(&config).unwrap();

        for i in 0..32u8 {
            cache.put(vec![i], vec![0u8; 6]).unwrap();
        }
        assert!(cache.weight() <= 64);
        cache.close();
    }

    #[test]
    fn unbounded_cache_keeps_everything() {
        let config = DistributedConfig::for_node("n1");
        let cache = build_local_cache(&config).unwrap();
        for i in 0..100u8 {
            cache.put(vec![i], vec![i]).unwrap();
        }
        assert_eq!(cache.len(), 100);
        cache.close();
    }
}
