//! # Distributed Router
//!
//! Routes every operation to the key's ring owner: local dispatch when the
//! owner is this node, otherwise one transport round trip with bounded
//! retries and exponential backoff. A timeout or transport failure surfaces
//! as `Unavailable`; the router never silently falls back to a different
//! node, which would break the single-authority invariant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use lkv_common::proto::{Op, Request, Response, Status};
use lkv_common::{ConsistencyLevel, DistributedConfig, LatticeError, LatticeResult};
use lkv_engine::{Cache, RemovalCause};

use crate::membership::{ClusterMembership, ClusterView};
use crate::ring::HashRing;
use crate::transport::Transport;

/// Initial retry backoff; doubles per attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// How long a session route stays pinned to one owner.
const SESSION_WINDOW: Duration = Duration::from_secs(30);

pub(crate) struct RingState {
    pub version: u64,
    pub ring: HashRing,
}

struct StickyRoute {
    owner: String,
    expires: Instant,
}

/// Where an operation was dispatched.
enum Routed {
    /// This node owns the key; serve from the local store.
    Local,
    /// The owner answered over the wire.
    Remote(Response),
}

/// A cache node participating in a cluster.
///
/// Holds the local engine cache for keys this node owns, routes everything
/// else to the owner, and services incoming wire requests through
/// [`DistributedCache::handle_request`].
pub struct DistributedCache {
    pub(crate) config: DistributedConfig,
    pub(crate) membership: Arc<ClusterMembership>,
    pub(crate) local: Arc<Cache<Vec<u8>, Vec<u8>>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) ring: RwLock<RingState>,
    next_op_id: AtomicU64,
    pub(crate) in_transit: Mutex<HashSet<Vec<u8>>>,
    sticky: Mutex<HashMap<Vec<u8>, StickyRoute>>,
}

impl DistributedCache {
    /// Creates a node over an existing local cache, membership, and
    /// transport.
    pub fn new(
        config: DistributedConfig,
        local: Arc<Cache<Vec<u8>, Vec<u8>>>,
        membership: Arc<ClusterMembership>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        DistributedCache {
            ring: RwLock::new(RingState {
                version: u64::MAX,
                ring: HashRing::with_virtual_nodes(config.virtual_nodes_per_node),
            }),
            config,
            membership,
            local,
            transport,
            next_op_id: AtomicU64::new(0),
            in_transit: Mutex::new(HashSet::new()),
            sticky: Mutex::new(HashMap::new()),
        }
    }

    /// This node's identifier.
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// The local engine cache backing this node.
    pub fn local(&self) -> &Cache<Vec<u8>, Vec<u8>> {
        &self.local
    }

    /// Registers this node in the membership and marks it healthy.
    pub fn register_self(&self, address: &str) {
        self.membership.join(&self.config.node_id, address);
        self.membership.mark_healthy(&self.config.node_id);
    }

    /// Topology version the router currently operates at.
    pub fn topology_version(&self) -> u64 {
        self.membership.version()
    }

    /// Fetches a value from the key's owner.
    pub async fn get(&self, key: &[u8]) -> LatticeResult<Option<Vec<u8>>> {
        if self.is_in_transit(key) {
            // Reads observe the pre-migration owner while a key is moving.
            if self.config.consistency_level == ConsistencyLevel::Strong {
                return Err(unavailable("key is migrating"));
            }
            return Ok(self.local.get(&key.to_vec())?.map(|v| (*v).clone()));
        }
        match self
            .route(key, |op_id, version| {
                Request::get(op_id, version, key.to_vec())
            })
            .await?
        {
            Routed::Local => Ok(self.local.get(&key.to_vec())?.map(|v| (*v).clone())),
            Routed::Remote(response) => match response.status {
                Status::Ok => Ok(response.value),
                Status::NotFound => Ok(None),
                other => Err(status_error(other)),
            },
        }
    }

    /// Installs a value on the key's owner.
    ///
    /// While a key is in transit its writes go to the new owner and the
    /// local in-transit copy is invalidated, so the migrated value can
    /// never resurrect over a newer write.
    pub async fn put(&self, key: &[u8], value: Vec<u8>) -> LatticeResult<()> {
        if self.config.consistency_level == ConsistencyLevel::Strong && self.is_in_transit(key) {
            return Err(unavailable("key is migrating"));
        }
        match self
            .route(key, |op_id, version| {
                Request::put(op_id, version, key.to_vec(), value.clone())
            })
            .await?
        {
            Routed::Local => self.local.put(key.to_vec(), value),
            Routed::Remote(response) => match response.status {
                Status::Ok => {
                    self.invalidate_in_transit(key);
                    Ok(())
                }
                other => Err(status_error(other)),
            },
        }
    }

    /// Removes a key on its owner; returns whether a value was present.
    pub async fn remove(&self, key: &[u8]) -> LatticeResult<bool> {
        if self.config.consistency_level == ConsistencyLevel::Strong && self.is_in_transit(key) {
            return Err(unavailable("key is migrating"));
        }
        match self
            .route(key, |op_id, version| {
                Request::remove(op_id, version, key.to_vec())
            })
            .await?
        {
            Routed::Local => Ok(self.local.remove(&key.to_vec())?.is_some()),
            Routed::Remote(response) => match response.status {
                Status::Ok => {
                    self.invalidate_in_transit(key);
                    Ok(true)
                }
                Status::NotFound => Ok(false),
                other => Err(status_error(other)),
            },
        }
    }

    /// Services one incoming wire request.
    ///
    /// A request carrying an older topology version than ours is answered
    /// with `stale_topology` and our version, and so is a data request for
    /// a key this node does not own at the current version.
    pub fn handle_request(&self, request: Request) -> Response {
        let local_version = self.membership.version();
        match request.op {
            Op::Health => {
                let mut response = Response::ok(request.op_id);
                response.meta = Some(self.local.len().to_string());
                response
            }
            Op::Topology => match serde_json::to_string(&self.membership.view()) {
                Ok(view) => {
                    let mut response = Response::ok(request.op_id);
                    response.meta = Some(view);
                    response
                }
                Err(_) => Response::status(request.op_id, Status::InternalError),
            },
            Op::MigrateRange => self.handle_migrate(request, local_version),
            Op::Get | Op::Put | Op::Remove => {
                if request.topology_version < local_version {
                    return Response::stale_topology(request.op_id, local_version);
                }
                if !self.owns_at_current_version(&request.key) {
                    return Response::stale_topology(request.op_id, local_version);
                }
                self.handle_data_op(request)
            }
        }
    }

    fn handle_data_op(&self, request: Request) -> Response {
        match request.op {
            Op::Get => match self.local.get(&request.key) {
                Ok(Some(value)) => Response::ok_value(request.op_id, (*value).clone()),
                Ok(None) => Response::status(request.op_id, Status::NotFound),
                Err(_) => Response::status(request.op_id, Status::Unavailable),
            },
            Op::Put => {
                let Some(value) = request.value else {
                    return Response::status(request.op_id, Status::InternalError);
                };
                match self.local.put(request.key, value) {
                    Ok(()) => Response::ok(request.op_id),
                    Err(LatticeError::CapacityExceeded) => {
                        Response::status(request.op_id, Status::PayloadTooLarge)
                    }
                    Err(_) => Response::status(request.op_id, Status::Unavailable),
                }
            }
            Op::Remove => match self.local.remove(&request.key) {
                Ok(Some(_)) => Response::ok(request.op_id),
                Ok(None) => Response::status(request.op_id, Status::NotFound),
                Err(_) => Response::status(request.op_id, Status::Unavailable),
            },
            _ => Response::status(request.op_id, Status::InternalError),
        }
    }

    /// Accepts a migration batch: only at an exactly matching topology
    /// version, and only the keys this node owns at that version. A key
    /// that already has a local value keeps it: a direct write that raced
    /// ahead of the batch must win.
    fn handle_migrate(&self, request: Request, local_version: u64) -> Response {
        if request.topology_version != local_version {
            debug!(
                sender = request.topology_version,
                local = local_version,
                "rejecting stale migration batch"
            );
            return Response::stale_topology(request.op_id, local_version);
        }

        let mut accepted = 0usize;
        for entry in request.entries {
            if !self.owns_at_current_version(&entry.key) {
                continue;
            }
            if self.local.contains(&entry.key) {
                accepted += 1;
                continue;
            }
            if entry.ttl_ms == Some(0) {
                continue;
            }
            if self.local.put(entry.key, entry.value).is_ok() {
                accepted += 1;
            }
        }
        debug!(accepted, "migration batch applied");
        let mut response = Response::ok(request.op_id);
        response.meta = Some(accepted.to_string());
        response
    }

    /// Dispatches to the owner with bounded retries and backoff.
    ///
    /// Stale-topology replies refresh the view from the receiver before the
    /// next attempt; timeouts and transport faults retry, then surface as
    /// `Unavailable`.
    async fn route<F>(&self, key: &[u8], build: F) -> LatticeResult<Routed>
    where
        F: Fn(u64, u64) -> Request,
    {
        let mut backoff = INITIAL_BACKOFF;
        let mut last = unavailable("no live owners");

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }

            let (version, owner) = match self.owner_for(key) {
                Ok(resolved) => resolved,
                Err(err) => {
                    last = err;
                    continue;
                }
            };
            if owner == self.config.node_id {
                return Ok(Routed::Local);
            }
            let Some(addr) = self.membership.address_of(&owner) else {
                last = unavailable(&format!("no address for {owner}"));
                continue;
            };

            let request = build(self.next_op_id(), version);
            match self.transport.send(&addr, request).await {
                Ok(response) if response.status == Status::StaleTopology => {
                    let receiver = response.receiver_version().unwrap_or(version);
                    debug!(sender = version, receiver, owner = %owner, "stale topology, refreshing");
                    last = LatticeError::StaleTopology {
                        sender: version,
                        receiver,
                    };
                    let _ = self.refresh_view_from(&addr).await;
                }
                Ok(response) if response.status == Status::Unavailable => {
                    last = unavailable(&format!("{owner} reported unavailable"));
                }
                Ok(response) => {
                    self.record_session_route(key, &owner);
                    return Ok(Routed::Remote(response));
                }
                Err(LatticeError::Timeout) => {
                    warn!(owner = %owner, "remote operation timed out");
                    last = unavailable(&format!("{owner} timed out"));
                }
                Err(err) if err.is_retryable() => {
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(match last {
            LatticeError::Io(message) => unavailable(&message),
            other => other,
        })
    }

    /// Resolves the owner at the current ring version, honoring session
    /// stickiness when configured.
    fn owner_for(&self, key: &[u8]) -> LatticeResult<(u64, String)> {
        self.refresh_ring_if_stale();

        if self.config.consistency_level == ConsistencyLevel::Session {
            if let Some(owner) = self.valid_session_route(key) {
                let version = self.ring.read().version;
                return Ok((version, owner));
            }
        }

        let state = self.ring.read();
        let owner = state
            .ring
            .owner_of(key)
            .ok_or_else(|| unavailable("ring is empty"))?
            .to_string();
        Ok((state.version, owner))
    }

    /// Rebuilds the ring when the membership version moved.
    pub(crate) fn refresh_ring_if_stale(&self) {
        let version = self.membership.version();
        if self.ring.read().version == version {
            return;
        }
        let mut state = self.ring.write();
        if state.version == version {
            return;
        }
        let members = self.membership.ring_members();
        state.ring = HashRing::from_nodes(
            members.iter().map(String::as_str),
            self.config.virtual_nodes_per_node,
        );
        state.version = version;
        info!(version, nodes = members.len(), "ring rebuilt");
    }

    /// Fetches the receiver's view and adopts it when newer.
    async fn refresh_view_from(&self, addr: &str) -> LatticeResult<bool> {
        let request = Request {
            op_id: self.next_op_id(),
            topology_version: self.membership.version(),
            op: Op::Topology,
            key: Vec::new(),
            value: None,
            entries: Vec::new(),
            meta: None,
        };
        let response = self.transport.send(addr, request).await?;
        let Some(meta) = response.meta else {
            return Ok(false);
        };
        let view: ClusterView = serde_json::from_str(&meta)?;
        Ok(self.membership.apply_view(&view))
    }

    fn owns_at_current_version(&self, key: &[u8]) -> bool {
        self.refresh_ring_if_stale();
        let state = self.ring.read();
        state.ring.owner_of(key) == Some(self.config.node_id.as_str())
    }

    pub(crate) fn next_op_id(&self) -> u64 {
        self.next_op_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn is_in_transit(&self, key: &[u8]) -> bool {
        self.in_transit.lock().contains(key)
    }

    /// Drops the local copy of a key that was superseded while migrating.
    fn invalidate_in_transit(&self, key: &[u8]) {
        let was_in_transit = self.in_transit.lock().remove(key);
        if was_in_transit {
            let _ = self.local.remove_with_cause(&key.to_vec(), RemovalCause::Explicit);
        }
    }

    fn valid_session_route(&self, key: &[u8]) -> Option<String> {
        let mut sticky = self.sticky.lock();
        let route = sticky.get(key)?;
        if route.expires < Instant::now() {
            sticky.remove(key);
            return None;
        }
        let owner = route.owner.clone();
        drop(sticky);
        if self.membership.ring_members().contains(&owner) {
            Some(owner)
        } else {
            self.sticky.lock().remove(key);
            None
        }
    }

    fn record_session_route(&self, key: &[u8], owner: &str) {
        if self.config.consistency_level != ConsistencyLevel::Session {
            return;
        }
        self.sticky.lock().insert(
            key.to_vec(),
            StickyRoute {
                owner: owner.to_string(),
                expires: Instant::now() + SESSION_WINDOW,
            },
        );
    }
}

fn unavailable(message: &str) -> LatticeError {
    LatticeError::Unavailable(message.to_string())
}

/// Maps a remote status to the error the caller sees.
fn status_error(status: Status) -> LatticeError {
    match status {
        Status::Unavailable => unavailable("owner reported unavailable"),
        Status::StaleTopology => LatticeError::StaleTopology {
            sender: 0,
            receiver: 0,
        },
        Status::PayloadTooLarge => LatticeError::PayloadTooLarge { size: 0, limit: 0 },
        Status::InternalError => unavailable("remote internal error"),
        Status::Ok | Status::NotFound => unavailable("unexpected status"),
    }
}
