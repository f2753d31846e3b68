//! # Wire Protocol Shapes
//!
//! Request/response envelopes exchanged between cluster nodes. The byte
//! transport is pluggable; these shapes are the contract every transport
//! must preserve.
//!
//! ## Design Principles
//! 1. **Opaque Payloads**: Keys and values are byte strings; encoding of the
//!    application's types is the caller's concern.
//! 2. **Versioned Routing**: Every request carries the sender's topology
//!    version so receivers can reject stale routing decisions.
//! 3. **Distinct Statuses**: Timeouts, stale views, and remote faults are
//!    separate statuses so callers can retry selectively.

use serde::{Deserialize, Serialize};

/// Default maximum frame size for requests and responses (4 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Operations a node accepts over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Install a value for a key on the owner.
    Put,
    /// Fetch a value from the owner.
    Get,
    /// Remove a key from the owner.
    Remove,
    /// Liveness probe; meta carries the entry count.
    Health,
    /// Fetch the receiver's membership view.
    Topology,
    /// Stream a batch of entries whose ownership moved to the receiver.
    MigrateRange,
}

/// Response statuses a node returns over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Operation applied.
    Ok,
    /// Key absent on the owner.
    NotFound,
    /// Receiver cannot serve the key right now.
    Unavailable,
    /// Receiver holds a newer topology version than the request carried.
    StaleTopology,
    /// Request or response exceeded the frame limit.
    PayloadTooLarge,
    /// Unexpected failure on the receiver.
    InternalError,
}

/// One entry inside a migration batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEntry {
    /// Entry key.
    pub key: Vec<u8>,
    /// Entry value.
    pub value: Vec<u8>,
    /// Remaining write-relative TTL in milliseconds, if any.
    pub ttl_ms: Option<u64>,
}

/// Request envelope.
///
/// `op_id` is monotonically unique within a sender; `topology_version` is the
/// sender's view at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Sender-unique operation id.
    pub op_id: u64,
    /// Sender's topology version at dispatch time.
    pub topology_version: u64,
    /// Requested operation.
    pub op: Op,
    /// Key the operation targets; empty for node-level ops.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<u8>,
    /// Value payload for `Put`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    /// Migration batch for `MigrateRange`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<MigrationEntry>,
    /// Optional free-form metadata (e.g. session token).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
}

impl Request {
    /// Builds a `Get` request.
    pub fn get(op_id: u64, topology_version: u64, key: Vec<u8>) -> Self {
        Request {
            op_id,
            topology_version,
            op: Op::Get,
            key,
            value: None,
            entries: Vec::new(),
            meta: None,
        }
    }

    /// Builds a `Put` request.
    pub fn put(op_id: u64, topology_version: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        Request {
            op_id,
            topology_version,
            op: Op::Put,
            key,
            value: Some(value),
            entries: Vec::new(),
            meta: None,
        }
    }

    /// Builds a `Remove` request.
    pub fn remove(op_id: u64, topology_version: u64, key: Vec<u8>) -> Self {
        Request {
            op_id,
            topology_version,
            op: Op::Remove,
            key,
            value: None,
            entries: Vec::new(),
            meta: None,
        }
    }

    /// Builds a `MigrateRange` request carrying a batch of entries.
    pub fn migrate_range(
        op_id: u64,
        topology_version: u64,
        entries: Vec<MigrationEntry>,
    ) -> Self {
        Request {
            op_id,
            topology_version,
            op: Op::MigrateRange,
            key: Vec::new(),
            value: None,
            entries,
            meta: None,
        }
    }
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Echo of the request's operation id.
    pub op_id: u64,
    /// Outcome status.
    pub status: Status,
    /// Value payload for successful `Get`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    /// Optional metadata (e.g. receiver's topology version on stale replies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
}

impl Response {
    /// Builds a success response with no payload.
    pub fn ok(op_id: u64) -> Self {
        Response {
            op_id,
            status: Status::Ok,
            value: None,
            meta: None,
        }
    }

    /// Builds a success response carrying a value.
    pub fn ok_value(op_id: u64, value: Vec<u8>) -> Self {
        Response {
            op_id,
            status: Status::Ok,
            value: Some(value),
            meta: None,
        }
    }

    /// Builds a response with an explicit status and no payload.
    pub fn status(op_id: u64, status: Status) -> Self {
        Response {
            op_id,
            status,
            value: None,
            meta: None,
        }
    }

    /// Builds a stale-topology response advertising the receiver's version.
    pub fn stale_topology(op_id: u64, receiver_version: u64) -> Self {
        Response {
            op_id,
            status: Status::StaleTopology,
            value: None,
            meta: Some(receiver_version.to_string()),
        }
    }

    /// Parses the receiver's version out of a stale-topology reply.
    pub fn receiver_version(&self) -> Option<u64> {
        self.meta.as_deref().and_then(|meta| meta.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let request = Request::put(7, 3, b"alpha".to_vec(), b"value".to_vec());
        let encoded = serde_json::to_vec(&request).unwrap();
        let decoded: Request = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_roundtrip() {
        let response = Response::ok_value(7, b"value".to_vec());
        let encoded = serde_json::to_vec(&response).unwrap();
        let decoded: Response = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn stale_reply_carries_receiver_version() {
        let response = Response::stale_topology(9, 42);
        assert_eq!(response.status, Status::StaleTopology);
        assert_eq!(response.receiver_version(), Some(42));
    }

    #[test]
    fn get_request_omits_empty_fields() {
        let request = Request::get(1, 1, b"k".to_vec());
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(!encoded.contains("entries"));
        assert!(!encoded.contains("value"));
    }
}
