//! The stored record type.

use crate::vclock::VectorClock;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One stored record: the payload plus the version metadata replication needs.
///
/// A tombstone keeps its clock but carries no data; it is retained rather
/// than erased so that deletes propagate to every replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Value {
    /// Opaque payload. Empty when tombstoned.
    #[serde(default)]
    pub data: String,
    /// Causal version of this record.
    #[serde(default)]
    pub clock: VectorClock,
    /// Soft-delete marker.
    #[serde(default)]
    pub tombstone: bool,
    /// Wall-clock write time, milliseconds since the Unix epoch.
    /// Tie-breaker for concurrent clocks.
    #[serde(default)]
    pub updated_at_ms: u64,
}

impl Value {
    /// Build a live record stamped with the current wall clock.
    pub fn live(data: String, clock: VectorClock) -> Self {
        Self {
            data,
            clock,
            tombstone: false,
            updated_at_ms: now_ms(),
        }
    }

    /// Build a tombstone stamped with the current wall clock.
    pub fn tombstone(clock: VectorClock) -> Self {
        Self {
            data: String::new(),
            clock,
            tombstone: true,
            updated_at_ms: now_ms(),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
