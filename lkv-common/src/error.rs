//! # Error Types
//!
//! One error enum shared across the workspace. Key absence is never an
//! error; operations that may find nothing return `Option` inside `Ok`.

use std::sync::Arc;

use thiserror::Error;

/// Result alias used across the workspace.
pub type LatticeResult<T> = Result<T, LatticeError>;

/// Errors surfaced by the cache engine and the cluster layer.
#[derive(Debug, Clone, Error)]
pub enum LatticeError {
    /// A configured loader failed or timed out; the failure is not cached.
    #[error("loader failed: {0}")]
    LoadFailure(Arc<str>),

    /// A single entry's weight exceeds the configured maximum weight.
    #[error("entry weight exceeds maximum weight")]
    CapacityExceeded,

    /// Builder-time validation failure; fatal for that builder.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation attempted on a closed cache.
    #[error("cache is closed")]
    Closed,

    /// Remote owner unreachable or timed out in distributed mode.
    #[error("owner unavailable: {0}")]
    Unavailable(String),

    /// Receiver holds a newer topology view than the sender.
    #[error("stale topology: sender version {sender} < receiver version {receiver}")]
    StaleTopology {
        /// Topology version the request carried.
        sender: u64,
        /// Topology version the receiver holds.
        receiver: u64,
    },

    /// Request or response exceeds the configured frame limit.
    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge {
        /// Observed payload size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// Async operation cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Loader or async operation timed out locally.
    #[error("operation timed out")]
    Timeout,

    /// Network or IO failure.
    #[error("io error: {0}")]
    Io(Arc<str>),

    /// Wire-protocol framing or decode failure.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl LatticeError {
    /// Wraps a loader failure message.
    pub fn load_failure(message: impl Into<String>) -> Self {
        LatticeError::LoadFailure(Arc::from(message.into().as_str()))
    }

    /// Returns true when a bounded retry by the router may succeed.
    ///
    /// Stale topology is retryable after the sender refreshes its view;
    /// unavailability and IO failures are retryable as transient faults.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LatticeError::Unavailable(_)
                | LatticeError::StaleTopology { .. }
                | LatticeError::Io(_)
        )
    }
}

impl From<std::io::Error> for LatticeError {
    fn from(err: std::io::Error) -> Self {
        LatticeError::Io(Arc::from(err.to_string().as_str()))
    }
}

impl From<serde_json::Error> for LatticeError {
    fn from(err: serde_json::Error) -> Self {
        LatticeError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LatticeError::Unavailable("node-2".into()).is_retryable());
        assert!(LatticeError::StaleTopology { sender: 1, receiver: 2 }.is_retryable());
        assert!(!LatticeError::Closed.is_retryable());
        assert!(!LatticeError::CapacityExceeded.is_retryable());
    }

    #[test]
    fn io_error_converts() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let lattice: LatticeError = err.into();
        assert!(matches!(lattice, LatticeError::Io(_)));
    }
}
