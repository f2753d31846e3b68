//! # LatticeKV Node Server
//!
//! Host a cache node over TCP: accept connections, decode wire-protocol
//! frames, dispatch them to the distributed router, and answer with
//! encoded responses. Metrics cover request counts, errors, in-flight
//! requests, and a latency histogram.

mod metrics;
mod server;

pub use metrics::{LatencySnapshot, MetricsSnapshot, ServerMetrics};
pub use server::{build_local_cache, NodeServer};
