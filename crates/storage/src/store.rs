//! The single-node storage engine.
//!
//! Owns the in-memory map, the WAL, and the snapshot path. The rule that
//! makes crashes survivable: the WAL append happens before the in-memory
//! mutation, and a failed append leaves memory untouched.
//!
//! Locking: a readers-writer lock on the map (reads and raw fetches are
//! shared, mutations exclusive) and a separate mutex on the WAL. Mutations
//! append while holding the write lock, so WAL order equals logical write
//! order.

use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::value::Value;
use crate::vclock::{ClockRelation, VectorClock};
use crate::wal::{Wal, WalEntry, WalError, WalOp};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable key-value store for a single node. Safe for concurrent use.
#[derive(Debug)]
pub struct Store {
    data: RwLock<HashMap<String, Value>>,
    wal: Mutex<Wal>,
    snapshots: SnapshotStore,
    node_id: String,
}

impl Store {
    /// Open or create a store under `data_dir`.
    ///
    /// Recovery order matters: load the snapshot first, then replay the WAL
    /// on top of it. Replay rebuilds memory only and never re-appends.
    pub fn open(data_dir: &Path, node_id: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;

        let snapshots = SnapshotStore::new(data_dir.join("snapshot.json"));
        let mut data = snapshots.load()?.unwrap_or_default();

        let mut wal = Wal::open(&data_dir.join("wal.log"))?;
        for entry in wal.read_all()? {
            data.insert(entry.key, entry.value);
        }

        tracing::info!(node = node_id, keys = data.len(), "store opened");

        Ok(Self {
            data: RwLock::new(data),
            wal: Mutex::new(wal),
            snapshots,
            node_id: node_id.to_string(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Store or update a key. Bumps this node's vector-clock counter, appends
    /// to the WAL, then updates memory. Returns the stored value.
    pub fn put(
        &self,
        key: &str,
        data: &str,
        clock: Option<VectorClock>,
    ) -> Result<Value, StoreError> {
        let mut map = self.data.write();

        let mut clock = clock.unwrap_or_default();
        clock.increment(&self.node_id);
        let value = Value::live(data.to_string(), clock);

        self.append(WalOp::Put, key, &value)?;
        map.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Get the live value for a key. Tombstoned keys read as absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        let map = self.data.read();
        match map.get(key) {
            Some(v) if !v.tombstone => Some(v.clone()),
            _ => None,
        }
    }

    /// Get the stored value exactly as it exists, tombstones included.
    /// Used by replication and read repair so deletes propagate.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Soft-delete a key: write a tombstone carrying the key's clock history
    /// plus our own bump.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.data.write();

        let mut clock = map
            .get(key)
            .map(|v| v.clock.clone())
            .unwrap_or_default();
        clock.increment(&self.node_id);
        let value = Value::tombstone(clock);

        self.append(WalOp::Delete, key, &value)?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    /// Apply an update received from another node, arbitrating by vector
    /// clock:
    ///
    /// - incoming strictly older -> discard
    /// - incoming newer or equal -> accept
    /// - concurrent -> later wall clock wins, exact tie keeps the existing
    ///
    /// Returns whether the update was applied. Accepted updates are WAL'd.
    pub fn apply_remote(&self, key: &str, incoming: Value) -> Result<bool, StoreError> {
        let mut map = self.data.write();

        if let Some(existing) = map.get(key) {
            match incoming.clock.compare(&existing.clock) {
                ClockRelation::Before => return Ok(false),
                ClockRelation::Concurrent => {
                    if incoming.updated_at_ms <= existing.updated_at_ms {
                        return Ok(false);
                    }
                }
                ClockRelation::After | ClockRelation::Equal => {}
            }
        }

        self.append(WalOp::Put, key, &incoming)?;
        map.insert(key.to_string(), incoming);
        Ok(true)
    }

    /// All keys that are not tombstoned.
    pub fn keys(&self) -> Vec<String> {
        self.data
            .read()
            .iter()
            .filter(|(_, v)| !v.tombstone)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Persist the full state and reset the WAL.
    ///
    /// The map is copied under the shared lock and the lock released before
    /// any filesystem work. The WAL is truncated only after the snapshot
    /// rename has committed; truncating first would lose acknowledged writes
    /// on a crash between the two steps.
    pub fn snapshot(&self) -> Result<(), StoreError> {
        let copy = self.data.read().clone();
        self.snapshots.save(&copy)?;
        self.wal.lock().truncate()?;
        Ok(())
    }

    /// Flush the WAL. The file handle is released when the store drops.
    pub fn close(&self) -> Result<(), StoreError> {
        self.wal.lock().sync()?;
        Ok(())
    }

    fn append(&self, op: WalOp, key: &str, value: &Value) -> Result<(), WalError> {
        let entry = WalEntry {
            op,
            key: key.to_string(),
            value: value.clone(),
        };
        self.wal.lock().append(&entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        let stored = store.put("k1", "v1", None).unwrap();
        assert_eq!(stored.clock.get("n1"), 1);

        let got = store.get("k1").unwrap();
        assert_eq!(got.data, "v1");
    }

    #[test]
    fn test_put_bumps_own_counter_every_time() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        store.put("k", "a", None).unwrap();
        let second = store.put("k", "b", None).unwrap();
        // A fresh write with no client clock still starts from empty and
        // bumps once; the counter history lives in the stored value.
        assert_eq!(second.clock.get("n1"), 1);

        let chained = store
            .put("k", "c", Some(second.clock.clone()))
            .unwrap();
        assert_eq!(chained.clock.get("n1"), 2);
    }

    #[test]
    fn test_get_hides_tombstones() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        store.put("k1", "v1", None).unwrap();
        store.delete("k1").unwrap();

        assert!(store.get("k1").is_none());
        let raw = store.get_raw("k1").unwrap();
        assert!(raw.tombstone);
        assert_eq!(raw.clock.get("n1"), 2, "delete bumps the existing clock");
    }

    #[test]
    fn test_delete_missing_key_writes_tombstone() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        store.delete("ghost").unwrap();
        let raw = store.get_raw("ghost").unwrap();
        assert!(raw.tombstone);
        assert_eq!(raw.clock.get("n1"), 1);
    }

    #[test]
    fn test_keys_excludes_tombstones() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        store.put("a", "1", None).unwrap();
        store.put("b", "2", None).unwrap();
        store.delete("a").unwrap();

        let keys = store.keys();
        assert_eq!(keys, vec!["b".to_string()]);
    }

    // ── apply_remote arbitration ────────────────────────────────────────

    fn clock_of(entries: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_map(entries.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    #[test]
    fn test_apply_remote_accepts_when_absent() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        let incoming = Value::live("remote".into(), clock_of(&[("n2", 1)]));
        assert!(store.apply_remote("k", incoming).unwrap());
        assert_eq!(store.get("k").unwrap().data, "remote");
    }

    #[test]
    fn test_apply_remote_discards_older() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        store.apply_remote("k", Value::live("new".into(), clock_of(&[("n2", 2)]))).unwrap();
        let applied = store
            .apply_remote("k", Value::live("old".into(), clock_of(&[("n2", 1)])))
            .unwrap();

        assert!(!applied);
        assert_eq!(store.get("k").unwrap().data, "new");
    }

    #[test]
    fn test_apply_remote_accepts_newer() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        store.apply_remote("k", Value::live("old".into(), clock_of(&[("n2", 1)]))).unwrap();
        let applied = store
            .apply_remote("k", Value::live("new".into(), clock_of(&[("n2", 2)])))
            .unwrap();

        assert!(applied);
        assert_eq!(store.get("k").unwrap().data, "new");
    }

    #[test]
    fn test_apply_remote_concurrent_later_wall_clock_wins() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        let mut older = Value::live("mine".into(), clock_of(&[("n1", 1)]));
        older.updated_at_ms = 1_000;
        store.apply_remote("k", older).unwrap();

        let mut newer = Value::live("theirs".into(), clock_of(&[("n2", 1)]));
        newer.updated_at_ms = 1_001;
        assert!(store.apply_remote("k", newer).unwrap());
        assert_eq!(store.get("k").unwrap().data, "theirs");
    }

    #[test]
    fn test_apply_remote_concurrent_tie_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        let mut existing = Value::live("mine".into(), clock_of(&[("n1", 1)]));
        existing.updated_at_ms = 1_000;
        store.apply_remote("k", existing).unwrap();

        let mut incoming = Value::live("theirs".into(), clock_of(&[("n2", 1)]));
        incoming.updated_at_ms = 1_000;
        assert!(!store.apply_remote("k", incoming).unwrap());
        assert_eq!(store.get("k").unwrap().data, "mine");
    }

    #[test]
    fn test_apply_remote_tombstone_overwrites_stale_live_value() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), "n1").unwrap();

        store.apply_remote("k", Value::live("stale".into(), clock_of(&[("n2", 1)]))).unwrap();

        let tombstone = Value::tombstone(clock_of(&[("n2", 1), ("n3", 1)]));
        assert!(store.apply_remote("k", tombstone).unwrap());
        assert!(store.get("k").is_none());
        assert!(store.get_raw("k").unwrap().tombstone);
    }

    // ── durability ──────────────────────────────────────────────────────

    #[test]
    fn test_crash_recovery_replays_wal() {
        let dir = TempDir::new().unwrap();

        {
            let store = Store::open(dir.path(), "n1").unwrap();
            store.put("a", "1", None).unwrap();
            store.put("a", "2", None).unwrap();
            store.delete("b").unwrap();
            store.put("c", "3", None).unwrap();
            // Dropped without snapshot or close: simulated crash.
        }

        let store = Store::open(dir.path(), "n1").unwrap();
        assert_eq!(store.get("a").unwrap().data, "2");
        assert!(store.get("b").is_none());
        assert!(store.get_raw("b").unwrap().tombstone);
        assert_eq!(store.get("c").unwrap().data, "3");
    }

    #[test]
    fn test_snapshot_truncates_wal_and_recovers() {
        let dir = TempDir::new().unwrap();
        let wal_path = dir.path().join("wal.log");

        {
            let store = Store::open(dir.path(), "n1").unwrap();
            for i in 0..10 {
                store.put(&format!("k{i}"), &format!("v{i}"), None).unwrap();
            }
            store.snapshot().unwrap();
            assert_eq!(
                std::fs::metadata(&wal_path).unwrap().len(),
                0,
                "WAL must be empty right after a snapshot"
            );

            store.put("k10", "v10", None).unwrap();
            store.put("k11", "v11", None).unwrap();
        }

        let store = Store::open(dir.path(), "n1").unwrap();
        for i in 0..12 {
            assert_eq!(
                store.get(&format!("k{i}")).unwrap().data,
                format!("v{i}"),
                "key k{i} must survive snapshot + WAL replay"
            );
        }
    }

    #[test]
    fn test_recovery_prefers_wal_over_snapshot() {
        let dir = TempDir::new().unwrap();

        {
            let store = Store::open(dir.path(), "n1").unwrap();
            store.put("k", "snapshotted", None).unwrap();
            store.snapshot().unwrap();
            store.put("k", "from-wal", None).unwrap();
        }

        let store = Store::open(dir.path(), "n1").unwrap();
        assert_eq!(store.get("k").unwrap().data, "from-wal");
    }

    #[test]
    fn test_recovery_skips_corrupt_wal_line() {
        let dir = TempDir::new().unwrap();

        {
            let store = Store::open(dir.path(), "n1").unwrap();
            store.put("good", "1", None).unwrap();
        }
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(dir.path().join("wal.log"))
                .unwrap();
            f.write_all(b"garbage line\n").unwrap();
        }

        let store = Store::open(dir.path(), "n1").unwrap();
        assert_eq!(store.get("good").unwrap().data, "1");
    }

    #[test]
    fn test_tombstones_survive_snapshot() {
        let dir = TempDir::new().unwrap();

        {
            let store = Store::open(dir.path(), "n1").unwrap();
            store.put("k", "v", None).unwrap();
            store.delete("k").unwrap();
            store.snapshot().unwrap();
        }

        let store = Store::open(dir.path(), "n1").unwrap();
        assert!(store.get("k").is_none());
        assert!(store.get_raw("k").unwrap().tombstone);
    }
}
