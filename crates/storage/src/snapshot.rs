//! Point-in-time snapshots of the full key space.
//!
//! A snapshot is the serialised `key -> Value` map. It is written to a
//! sibling temporary file and renamed over the canonical path, so the
//! canonical file is always either the previous snapshot or a complete new
//! one, never a torn write.

use crate::value::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Reads and writes the canonical snapshot file.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Write the full state to `<path>.tmp`, fsync, then rename over the
    /// canonical path.
    pub fn save(&self, state: &HashMap<String, Value>) -> Result<(), SnapshotError> {
        let tmp = self.tmp_path();
        let data = serde_json::to_vec(state)?;

        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Load the canonical snapshot. A missing file is not an error: it just
    /// means no snapshot has been taken yet.
    pub fn load(&self) -> Result<Option<HashMap<String, Value>>, SnapshotError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(".tmp");
        PathBuf::from(os)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vclock::VectorClock;
    use tempfile::TempDir;

    fn state(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| {
                let mut clock = VectorClock::new();
                clock.increment("n1");
                (k.to_string(), Value::live(v.to_string(), clock))
            })
            .collect()
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));

        let s = state(&[("a", "1"), ("b", "2")]);
        store.save(&s).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["a"].data, "1");
        assert_eq!(loaded["b"].data, "2");
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));

        store.save(&state(&[("a", "old")])).unwrap();
        store.save(&state(&[("a", "new"), ("b", "2")])).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded["a"].data, "new");
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = SnapshotStore::new(path.clone());
        store.save(&state(&[("a", "1")])).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_stale_tmp_does_not_break_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = SnapshotStore::new(path.clone());

        store.save(&state(&[("a", "1")])).unwrap();
        // A crash mid-save leaves a partial tmp file; the canonical snapshot
        // must still load.
        fs::write(dir.path().join("snapshot.json.tmp"), b"{partial").unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded["a"].data, "1");
    }
}
