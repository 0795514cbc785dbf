//! Vector clocks for causal versioning.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How two vector clocks relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockRelation {
    /// This clock is strictly older than the other.
    Before,
    /// This clock is strictly newer than the other.
    After,
    /// Identical clocks.
    Equal,
    /// Neither is newer. Independent writes, a true conflict.
    Concurrent,
}

/// A vector clock: maps node identifiers to monotonic counters.
///
/// A missing entry is equivalent to a counter of 0. Serialises as a plain
/// JSON object so WAL entries and wire bodies stay self-describing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: HashMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a raw map.
    pub fn from_map(entries: HashMap<String, u64>) -> Self {
        Self { entries }
    }

    /// Get the counter for a node (0 if not present).
    pub fn get(&self, node: &str) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// Bump the counter for a node by 1, creating the entry if absent.
    pub fn increment(&mut self, node: &str) {
        *self.entries.entry(node.to_string()).or_insert(0) += 1;
    }

    /// Merge two vector clocks (element-wise max). Combines version history
    /// without resolving conflicts.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.entries.clone();
        for (node, &count) in &other.entries {
            let entry = merged.entry(node.clone()).or_insert(0);
            *entry = (*entry).max(count);
        }
        Self { entries: merged }
    }

    /// Compare two vector clocks.
    ///
    /// `self` is After when it has at least one counter strictly greater than
    /// `other` and none strictly smaller; Before is the mirror image; both
    /// directions dominated means Concurrent.
    pub fn compare(&self, other: &Self) -> ClockRelation {
        let mut self_ahead = false;
        let mut other_ahead = false;

        for (node, &count) in &self.entries {
            let theirs = other.get(node);
            if count > theirs {
                self_ahead = true;
            }
            if theirs > count {
                other_ahead = true;
            }
        }
        for (node, &count) in &other.entries {
            if !self.entries.contains_key(node) && count > 0 {
                other_ahead = true;
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => ClockRelation::Equal,
            (true, false) => ClockRelation::After,
            (false, true) => ClockRelation::Before,
            (true, true) => ClockRelation::Concurrent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return the raw entries.
    pub fn entries(&self) -> &HashMap<String, u64> {
        &self.entries
    }
}
