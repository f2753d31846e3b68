//! # Cluster Membership
//!
//! The current view of the cluster: per-node health, addresses, and a
//! monotone topology version bumped on every transition. Suspected nodes
//! keep ring ownership until the grace window elapses; failed and departed
//! nodes are removed.

use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Health states a node moves through.
///
/// Transitions: `Joining → Healthy → Suspected → (Healthy | Failed)`, and
/// any state `→ Left` on a clean departure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    /// Announced but not yet serving; not a ring owner.
    Joining,
    /// Serving and heartbeating; a ring owner.
    Healthy,
    /// Missed heartbeats; still a ring owner until the grace window ends.
    Suspected,
    /// Grace window elapsed; removed from the ring.
    Failed,
    /// Departed cleanly; removed from the ring.
    Left,
}

/// One member in a serialized view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Stable node identifier.
    pub node_id: String,
    /// Transport address.
    pub address: String,
    /// Current health.
    pub health: NodeHealth,
}

/// Snapshot of the membership state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    /// Monotone version; increases on every transition.
    pub version: u64,
    /// All known members, including failed and departed ones.
    pub members: Vec<MemberInfo>,
}

/// Source of seed nodes; platform integrations live outside the core.
pub trait DiscoverySource: Send + Sync {
    /// Returns `(node_id, address)` seeds.
    fn seeds(&self) -> Vec<(String, String)>;
}

/// Fixed seed list, the in-tree discovery source.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    seeds: Vec<(String, String)>,
}

impl StaticDiscovery {
    /// Builds a discovery source over explicit `(node_id, address)` pairs.
    pub fn new(seeds: Vec<(String, String)>) -> Self {
        StaticDiscovery { seeds }
    }
}

impl DiscoverySource for StaticDiscovery {
    fn seeds(&self) -> Vec<(String, String)> {
        self.seeds.clone()
    }
}

struct NodeRecord {
    address: String,
    health: NodeHealth,
    last_seen: Instant,
    suspected_since: Option<Instant>,
}

struct MembershipState {
    nodes: HashMap<String, NodeRecord>,
    version: u64,
}

/// Thread-safe membership tracker.
pub struct ClusterMembership {
    state: RwLock<MembershipState>,
    grace: Duration,
}

impl ClusterMembership {
    /// Creates an empty membership with the given suspicion grace window.
    pub fn new(grace: Duration) -> Self {
        ClusterMembership {
            state: RwLock::new(MembershipState {
                nodes: HashMap::new(),
                version: 0,
            }),
            grace,
        }
    }

    /// Seeds the membership from a discovery source; seeds join healthy.
    pub fn bootstrap(&self, discovery: &dyn DiscoverySource) {
        for (node_id, address) in discovery.seeds() {
            self.join(&node_id, &address);
            self.mark_healthy(&node_id);
        }
    }

    /// Current topology version.
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Registers a node as joining (or re-joining).
    pub fn join(&self, node_id: &str, address: &str) {
        let mut state = self.state.write();
        let now = Instant::now();
        state.nodes.insert(
            node_id.to_string(),
            NodeRecord {
                address: address.to_string(),
                health: NodeHealth::Joining,
                last_seen: now,
                suspected_since: None,
            },
        );
        bump(&mut state, node_id, NodeHealth::Joining);
    }

    /// Promotes a joining or suspected node to healthy.
    pub fn mark_healthy(&self, node_id: &str) {
        self.transition(node_id, NodeHealth::Healthy);
    }

    /// Marks a node suspected; ring ownership holds until the grace window.
    pub fn mark_suspected(&self, node_id: &str) {
        self.transition(node_id, NodeHealth::Suspected);
    }

    /// Marks a node failed, removing it from ring ownership.
    pub fn mark_failed(&self, node_id: &str) {
        self.transition(node_id, NodeHealth::Failed);
    }

    /// Records a clean departure.
    pub fn mark_left(&self, node_id: &str) {
        self.transition(node_id, NodeHealth::Left);
    }

    /// Records a heartbeat; a suspected node recovers to healthy.
    pub fn record_heartbeat(&self, node_id: &str) {
        let mut state = self.state.write();
        let Some(record) = state.nodes.get_mut(node_id) else {
            return;
        };
        record.last_seen = Instant::now();
        if record.health == NodeHealth::Suspected || record.health == NodeHealth::Joining {
            record.health = NodeHealth::Healthy;
            record.suspected_since = None;
            bump(&mut state, node_id, NodeHealth::Healthy);
        }
    }

    /// Applies time-based transitions: silent healthy nodes become
    /// suspected; suspicion sustained past the grace window becomes failed.
    pub fn tick(&self, heartbeat_timeout: Duration) {
        let now = Instant::now();
        let mut state = self.state.write();
        let mut transitions: Vec<(String, NodeHealth)> = Vec::new();

        for (node_id, record) in state.nodes.iter_mut() {
            match record.health {
                NodeHealth::Healthy if now.duration_since(record.last_seen) > heartbeat_timeout => {
                    record.health = NodeHealth::Suspected;
                    record.suspected_since = Some(now);
                    transitions.push((node_id.clone(), NodeHealth::Suspected));
                }
                NodeHealth::Suspected => {
                    let since = record.suspected_since.unwrap_or(record.last_seen);
                    if now.duration_since(since) > self.grace {
                        record.health = NodeHealth::Failed;
                        transitions.push((node_id.clone(), NodeHealth::Failed));
                    }
                }
                _ => {}
            }
        }

        for (node_id, health) in transitions {
            bump(&mut state, &node_id, health);
        }
    }

    /// Nodes that currently own ring positions (healthy or in-grace
    /// suspected).
    pub fn ring_members(&self) -> Vec<String> {
        let state = self.state.read();
        let mut members: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, r)| matches!(r.health, NodeHealth::Healthy | NodeHealth::Suspected))
            .map(|(id, _)| id.clone())
            .collect();
        members.sort_unstable();
        members
    }

    /// Transport address of a node, if known.
    pub fn address_of(&self, node_id: &str) -> Option<String> {
        self.state.read().nodes.get(node_id).map(|r| r.address.clone())
    }

    /// Health of a node, if known.
    pub fn health_of(&self, node_id: &str) -> Option<NodeHealth> {
        self.state.read().nodes.get(node_id).map(|r| r.health)
    }

    /// Full snapshot for the `Topology` wire operation.
    pub fn view(&self) -> ClusterView {
        let state = self.state.read();
        let mut members: Vec<MemberInfo> = state
            .nodes
            .iter()
            .map(|(id, record)| MemberInfo {
                node_id: id.clone(),
                address: record.address.clone(),
                health: record.health,
            })
            .collect();
        members.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        ClusterView {
            version: state.version,
            members,
        }
    }

    /// Adopts a peer's view when it is strictly newer than ours.
    ///
    /// Used by the router after a `stale_topology` reply; the receiver's
    /// advertised view replaces the local one wholesale.
    pub fn apply_view(&self, view: &ClusterView) -> bool {
        let mut state = self.state.write();
        if view.version <= state.version {
            return false;
        }
        let now = Instant::now();
        state.nodes = view
            .members
            .iter()
            .map(|member| {
                (
                    member.node_id.clone(),
                    NodeRecord {
                        address: member.address.clone(),
                        health: member.health,
                        last_seen: now,
                        suspected_since: None,
                    },
                )
            })
            .collect();
        state.version = view.version;
        info!(version = state.version, "adopted newer topology view");
        true
    }

    fn transition(&self, node_id: &str, health: NodeHealth) {
        let mut state = self.state.write();
        let Some(record) = state.nodes.get_mut(node_id) else {
            return;
        };
        if record.health == health {
            return;
        }
        record.health = health;
        record.suspected_since = if health == NodeHealth::Suspected {
            Some(Instant::now())
        } else {
            None
        };
        bump(&mut state, node_id, health);
    }
}

/// Increments the topology version after a transition.
fn bump(state: &mut MembershipState, node_id: &str, health: NodeHealth) {
    state.version += 1;
    info!(node = node_id, ?health, version = state.version, "topology change");
}
