//! # Consistent-Hash Ring
//!
//! Sorted virtual-node points over a 64-bit hash space. A key is owned by
//! the first point at or after its hash, wrapping at the end; each physical
//! node contributes V points so that membership changes move only O(K/N)
//! keys in expectation.

use std::sync::Arc;

use lkv_common::DEFAULT_VIRTUAL_NODES;

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hash of a byte string.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// One virtual node position.
#[derive(Debug, Clone)]
struct RingPoint {
    hash: u64,
    virtual_id: u32,
    node_id: Arc<str>,
}

/// A hash interval whose owner changed after a membership update.
///
/// The interval is half-open `(start, end]` on the ring, wrapping through
/// zero when `start > end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipChange {
    /// Exclusive interval start.
    pub start: u64,
    /// Inclusive interval end (the moved virtual point).
    pub end: u64,
    /// Owner before the change; `None` when the ring was empty.
    pub previous_owner: Option<Arc<str>>,
    /// Owner after the change.
    pub new_owner: Arc<str>,
}

/// Consistent-hash ring with virtual nodes.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: Vec<RingPoint>,
    virtual_nodes: usize,
}

impl HashRing {
    /// Creates an empty ring with the default virtual-node count.
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    /// Creates an empty ring with an explicit virtual-node count.
    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        HashRing {
            points: Vec::new(),
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    /// Builds a ring from a set of node ids in one pass.
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a str>, virtual_nodes: usize) -> Self {
        let mut ring = Self::with_virtual_nodes(virtual_nodes);
        for node in nodes {
            ring.add_node(node);
        }
        ring
    }

    /// Number of virtual points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no nodes are present.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Distinct physical nodes on the ring.
    pub fn node_count(&self) -> usize {
        let mut nodes: Vec<&str> = self.points.iter().map(|p| p.node_id.as_ref()).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes.len()
    }

    /// True when the node contributes points to the ring.
    pub fn contains_node(&self, node_id: &str) -> bool {
        self.points.iter().any(|p| p.node_id.as_ref() == node_id)
    }

    /// Inserts V virtual points for a node and reports the intervals that
    /// changed ownership. Re-adding a present node changes nothing.
    pub fn add_node(&mut self, node_id: &str) -> Vec<OwnershipChange> {
        if self.contains_node(node_id) {
            return Vec::new();
        }
        let node: Arc<str> = Arc::from(node_id);

        // Capture prior ownership before mutating.
        let old = self.clone();
        let mut new_hashes = Vec::with_capacity(self.virtual_nodes);
        for i in 0..self.virtual_nodes as u32 {
            let hash = virtual_hash(node_id, i);
            self.points.push(RingPoint {
                hash,
                virtual_id: i,
                node_id: Arc::clone(&node),
            });
            new_hashes.push(hash);
        }
        self.points.sort_by(|a, b| {
            a.hash
                .cmp(&b.hash)
                .then_with(|| a.node_id.cmp(&b.node_id))
                .then_with(|| a.virtual_id.cmp(&b.virtual_id))
        });

        new_hashes
            .into_iter()
            .map(|hash| OwnershipChange {
                start: self.predecessor_hash(hash),
                end: hash,
                previous_owner: old.owner_of_hash(hash).map(Arc::from),
                new_owner: Arc::clone(&node),
            })
            .collect()
    }

    /// Removes a node's points and reports the intervals survivors now own.
    pub fn remove_node(&mut self, node_id: &str) -> Vec<OwnershipChange> {
        if !self.contains_node(node_id) {
            return Vec::new();
        }

        let old = self.clone();
        let removed: Vec<(u64, u64)> = old
            .points
            .iter()
            .filter(|p| p.node_id.as_ref() == node_id)
            .map(|p| (old.predecessor_hash(p.hash), p.hash))
            .collect();
        self.points.retain(|p| p.node_id.as_ref() != node_id);

        removed
            .into_iter()
            .filter_map(|(start, end)| {
                let new_owner = self.owner_of_hash(end)?;
                Some(OwnershipChange {
                    start,
                    end,
                    previous_owner: Some(Arc::from(node_id)),
                    new_owner: Arc::from(new_owner),
                })
            })
            .collect()
    }

    /// Owner of a key, or `None` on an empty ring.
    pub fn owner_of(&self, key: &[u8]) -> Option<&str> {
        self.owner_of_hash(fnv1a64(key))
    }

    /// Owner of a raw ring position.
    pub fn owner_of_hash(&self, hash: u64) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let idx = self.successor_index(hash);
        Some(self.points[idx].node_id.as_ref())
    }

    /// First `replicas` distinct physical owners clockwise from the key.
    pub fn replicas_of(&self, key: &[u8], replicas: usize) -> Vec<&str> {
        let mut owners: Vec<&str> = Vec::with_capacity(replicas);
        if self.points.is_empty() || replicas == 0 {
            return owners;
        }
        let start = self.successor_index(fnv1a64(key));
        for offset in 0..self.points.len() {
            let point = &self.points[(start + offset) % self.points.len()];
            let node = point.node_id.as_ref();
            if !owners.contains(&node) {
                owners.push(node);
                if owners.len() == replicas {
                    break;
                }
            }
        }
        owners
    }

    /// Index of the first point with hash >= `hash`, wrapping to zero.
    fn successor_index(&self, hash: u64) -> usize {
        match self.points.partition_point(|p| p.hash < hash) {
            idx if idx == self.points.len() => 0,
            idx => idx,
        }
    }

    /// Hash of the point immediately before `hash` on the ring.
    fn predecessor_hash(&self, hash: u64) -> u64 {
        let idx = self.points.partition_point(|p| p.hash < hash);
        if idx == 0 {
            self.points.last().map(|p| p.hash).unwrap_or(hash)
        } else {
            self.points[idx - 1].hash
        }
    }
}

/// Position of virtual node `i` for a physical node.
fn virtual_hash(node_id: &str, i: u32) -> u64 {
    let mut bytes = Vec::with_capacity(node_id.len() + 11);
    bytes.extend_from_slice(node_id.as_bytes());
    bytes.push(b':');
    bytes.extend_from_slice(i.to_string().as_bytes());
    fnv1a64(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_owns_nothing() {
        let ring = HashRing::new();
        assert!(ring.is_empty());
        assert_eq!(ring.owner_of(b"key"), None);
        assert!(ring.replicas_of(b"key", 2).is_empty());
    }

    #[test]
    fn single_node_owns_everything() {
        let mut ring = HashRing::with_virtual_nodes(10);
        ring.add_node("a");
        for i in 0..100 {
            assert_eq!(ring.owner_of(format!("key-{i}").as_bytes()), Some("a"));
        }
    }

    #[test]
    fn add_node_inserts_virtual_points() {
        let mut ring = HashRing::with_virtual_nodes(150);
        ring.add_node("a");
        ring.add_node("b");
        assert_eq!(ring.len(), 300);
        assert_eq!(ring.node_count(), 2);
    }

    #[test]
    fn re_adding_a_node_changes_nothing() {
        let mut ring = HashRing::with_virtual_nodes(50);
        ring.add_node("a");
        let changes = ring.add_node("a");
        assert!(changes.is_empty());
        assert_eq!(ring.len(), 50);
    }

    #[test]
    fn owner_is_stable_without_ring_changes() {
        let mut ring = HashRing::with_virtual_nodes(150);
        for node in ["a", "b", "c"] {
            ring.add_node(node);
        }
        let owners: Vec<String> = (0..1000)
            .map(|i| ring.owner_of(format!("key-{i}").as_bytes()).unwrap().to_string())
            .collect();
        for (i, owner) in owners.iter().enumerate() {
            assert_eq!(
                ring.owner_of(format!("key-{i}").as_bytes()).unwrap(),
                owner
            );
        }
    }

    #[test]
    fn adding_a_node_only_moves_keys_into_new_intervals() {
        let mut ring = HashRing::with_virtual_nodes(150);
        for node in ["a", "b", "c"] {
            ring.add_node(node);
        }
        let before: Vec<(u64, String)> = (0..20_000)
            .map(|i| {
                let hash = fnv1a64(format!("key-{i}").as_bytes());
                (hash, ring.owner_of_hash(hash).unwrap().to_string())
            })
            .collect();

        let changes = ring.add_node("d");
        assert!(!changes.is_empty());

        for (hash, old_owner) in before {
            let new_owner = ring.owner_of_hash(hash).unwrap();
            if new_owner != old_owner {
                // Every moved key must fall inside a reported interval and
                // must now belong to the new node.
                assert_eq!(new_owner, "d");
                assert!(
                    changes.iter().any(|c| in_interval(hash, c.start, c.end)),
                    "moved key not covered by any changed interval"
                );
            }
        }
    }

    #[test]
    fn removing_a_node_reassigns_to_survivors() {
        let mut ring = HashRing::with_virtual_nodes(100);
        for node in ["a", "b", "c"] {
            ring.add_node(node);
        }
        ring.remove_node("b");
        assert!(!ring.contains_node("b"));
        for i in 0..1000 {
            let owner = ring.owner_of(format!("key-{i}").as_bytes()).unwrap();
            assert_ne!(owner, "b");
        }
    }

    #[test]
    fn replicas_are_distinct_physical_nodes() {
        let mut ring = HashRing::with_virtual_nodes(100);
        for node in ["a", "b", "c", "d"] {
            ring.add_node(node);
        }
        let replicas = ring.replicas_of(b"some-key", 3);
        assert_eq!(replicas.len(), 3);
        let mut deduped = replicas.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), 3);
    }

    fn in_interval(hash: u64, start: u64, end: u64) -> bool {
        if start < end {
            hash > start && hash <= end
        } else {
            // Wrapping interval through zero.
            hash > start || hash <= end
        }
    }
}
