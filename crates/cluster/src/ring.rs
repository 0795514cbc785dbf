//! Consistent-hash ring with virtual nodes.
//!
//! Each physical node contributes `vnodes` positions on a 2^32 ring,
//! hashed from `"{id}#{i}"`. A key belongs to the first position clockwise
//! from its own hash; replication walks further clockwise collecting
//! distinct physical nodes. Adding or removing one node therefore only
//! moves the keys adjacent to its positions.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Virtual positions per physical node. More positions smooth the load at
/// a small memory cost; 100-200 is the usual range.
pub const DEFAULT_VNODES: usize = 150;

/// The consistent-hash ring. Plain data: callers provide the locking
/// (see [`crate::membership::Membership`]).
#[derive(Debug, Clone)]
pub struct Ring {
    vnodes: usize,
    /// ring position -> physical node id
    ring: HashMap<u32, String>,
    /// positions of `ring`, ascending, for binary search
    sorted: Vec<u32>,
}

impl Ring {
    /// Create an empty ring. A `vnodes` of 0 falls back to the default.
    pub fn new(vnodes: usize) -> Self {
        let vnodes = if vnodes == 0 { DEFAULT_VNODES } else { vnodes };
        Self {
            vnodes,
            ring: HashMap::new(),
            sorted: Vec::new(),
        }
    }

    /// Insert all virtual positions for a physical node.
    ///
    /// Position collisions are overwritten by the last writer; with a
    /// 32-bit space and 150 positions per node that is vanishingly rare
    /// and averaged away.
    pub fn add_node(&mut self, node_id: &str) {
        for i in 0..self.vnodes {
            let pos = hash_position(&format!("{node_id}#{i}"));
            self.ring.insert(pos, node_id.to_string());
        }
        self.rebuild();
    }

    /// Remove all virtual positions for a physical node.
    pub fn remove_node(&mut self, node_id: &str) {
        for i in 0..self.vnodes {
            let pos = hash_position(&format!("{node_id}#{i}"));
            self.ring.remove(&pos);
        }
        self.rebuild();
    }

    /// The up-to-`n` distinct physical nodes responsible for `key`, in ring
    /// order: hash the key, find the first position at or after it (wrapping
    /// to the start), then walk clockwise until `n` distinct ids are seen or
    /// the ring is exhausted. An empty ring yields an empty list.
    pub fn get_nodes(&self, key: &str, n: usize) -> Vec<String> {
        if self.sorted.is_empty() || n == 0 {
            return Vec::new();
        }

        let pos = hash_position(key);
        let start = self.sorted.partition_point(|&p| p < pos) % self.sorted.len();

        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for i in 0..self.sorted.len() {
            if nodes.len() >= n {
                break;
            }
            let vpos = self.sorted[(start + i) % self.sorted.len()];
            let node_id = &self.ring[&vpos];
            if seen.insert(node_id.clone()) {
                nodes.push(node_id.clone());
            }
        }
        nodes
    }

    /// All distinct physical node ids, sorted.
    pub fn nodes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .ring
            .values()
            .collect::<HashSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Number of distinct physical nodes (not virtual positions).
    pub fn node_count(&self) -> usize {
        self.ring.values().collect::<HashSet<_>>().len()
    }

    fn rebuild(&mut self) {
        self.sorted = self.ring.keys().copied().collect();
        self.sorted.sort_unstable();
    }
}

/// Ring position of a string: the first 32 bits of its SHA-256 digest,
/// big-endian.
pub fn hash_position(s: &str) -> u32 {
    let digest = Sha256::digest(s.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
