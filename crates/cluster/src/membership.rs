//! Cluster roster: which nodes exist and how keys route to them.
//!
//! Membership is static here, seeded from configuration and mutated only by
//! explicit join/leave. A production deployment would layer a gossip
//! protocol on top; the replicator only needs the roster and the ring.

use crate::ring::Ring;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// host:port the node's HTTP API listens on.
    pub address: String,
    #[serde(default)]
    pub is_alive: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("node {0} already in cluster")]
    AlreadyJoined(String),
    #[error("node {0} not in cluster")]
    UnknownNode(String),
}

#[derive(Debug)]
struct Inner {
    nodes: HashMap<String, Node>,
    ring: Ring,
}

/// Tracks cluster members and owns the hash ring. Safe for concurrent use;
/// routing reads share the lock.
#[derive(Debug)]
pub struct Membership {
    inner: RwLock<Inner>,
}

impl Membership {
    /// Create a membership seeded with the given nodes, all marked alive.
    pub fn new(seeds: Vec<Node>, vnodes: usize) -> Self {
        let mut inner = Inner {
            nodes: HashMap::new(),
            ring: Ring::new(vnodes),
        };
        for mut node in seeds {
            node.is_alive = true;
            inner.ring.add_node(&node.id);
            inner.nodes.insert(node.id.clone(), node);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Add a new node to the roster and the ring.
    pub fn join(&self, mut node: Node) -> Result<(), MembershipError> {
        let mut inner = self.inner.write();
        if inner.nodes.contains_key(&node.id) {
            return Err(MembershipError::AlreadyJoined(node.id));
        }
        node.is_alive = true;
        inner.ring.add_node(&node.id);
        inner.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a node from the roster and the ring (graceful departure).
    pub fn leave(&self, node_id: &str) -> Result<(), MembershipError> {
        let mut inner = self.inner.write();
        if inner.nodes.remove(node_id).is_none() {
            return Err(MembershipError::UnknownNode(node_id.to_string()));
        }
        inner.ring.remove_node(node_id);
        Ok(())
    }

    /// Look up a node by id.
    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.inner.read().nodes.get(node_id).cloned()
    }

    /// A copy of every current node.
    pub fn all(&self) -> Vec<Node> {
        self.inner.read().nodes.values().cloned().collect()
    }

    /// Number of distinct physical nodes on the ring.
    pub fn node_count(&self) -> usize {
        self.inner.read().ring.node_count()
    }

    /// The live nodes responsible for `key` at replication factor `n`,
    /// in ring order.
    pub fn replica_nodes(&self, key: &str, n: usize) -> Vec<Node> {
        let inner = self.inner.read();
        inner
            .ring
            .get_nodes(key, n)
            .iter()
            .filter_map(|id| inner.nodes.get(id))
            .filter(|node| node.is_alive)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            address: format!("127.0.0.1:7{id}01"),
            is_alive: false, // seeding must flip this
        }
    }

    fn membership(ids: &[&str]) -> Membership {
        Membership::new(ids.iter().map(|id| node(id)).collect(), 150)
    }

    #[test]
    fn test_seeds_are_marked_alive() {
        let m = membership(&["a", "b"]);
        for n in m.all() {
            assert!(n.is_alive);
        }
        assert_eq!(m.node_count(), 2);
    }

    #[test]
    fn test_join_duplicate_fails() {
        let m = membership(&["a"]);
        let err = m.join(node("a")).unwrap_err();
        assert!(matches!(err, MembershipError::AlreadyJoined(id) if id == "a"));
    }

    #[test]
    fn test_join_extends_routing() {
        let m = membership(&["a"]);
        m.join(node("b")).unwrap();
        assert_eq!(m.node_count(), 2);

        // With N = 2 both nodes should now serve every key.
        let replicas = m.replica_nodes("some-key", 2);
        assert_eq!(replicas.len(), 2);
    }

    #[test]
    fn test_leave_unknown_fails() {
        let m = membership(&["a"]);
        let err = m.leave("ghost").unwrap_err();
        assert!(matches!(err, MembershipError::UnknownNode(id) if id == "ghost"));
    }

    #[test]
    fn test_leave_removes_from_routing() {
        let m = membership(&["a", "b", "c"]);
        m.leave("b").unwrap();
        assert_eq!(m.node_count(), 2);
        assert!(m.get("b").is_none());

        for n in m.replica_nodes("any-key", 3) {
            assert_ne!(n.id, "b");
        }
    }

    #[test]
    fn test_all_returns_copies() {
        let m = membership(&["a"]);
        let mut copy = m.all();
        copy[0].address = "mutated".into();
        assert_ne!(m.get("a").unwrap().address, "mutated");
    }

    #[test]
    fn test_replica_nodes_in_ring_order() {
        let m = membership(&["a", "b", "c"]);
        let replicas = m.replica_nodes("ordered-key", 3);
        assert_eq!(replicas.len(), 3);

        let inner_order = {
            let ring_ids: Vec<String> = replicas.iter().map(|n| n.id.clone()).collect();
            ring_ids
        };
        // Must match the ring's own answer exactly.
        let ring = {
            let mut r = Ring::new(150);
            for id in ["a", "b", "c"] {
                r.add_node(id);
            }
            r
        };
        assert_eq!(inner_order, ring.get_nodes("ordered-key", 3));
    }
}
