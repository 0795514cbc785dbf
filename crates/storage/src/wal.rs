//! Write-ahead log.
//!
//! Format: one JSON entry per line, `{"op":"PUT","key":…,"value":{…}}`.
//! Entries are fsynced before `append` returns, so an acknowledged mutation
//! survives a crash. On recovery the log is replayed top to bottom; corrupt
//! lines (including a torn final line) are skipped with a warning.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The operation recorded by a WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOp {
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
}

/// One durable log record. For deletes, `value` is the tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op: WalOp,
    pub key: String,
    pub value: Value,
}

/// An append-only log backed by a single file.
#[derive(Debug)]
pub struct Wal {
    file: File,
    #[allow(dead_code)] // kept for log rotation
    path: PathBuf,
}

impl Wal {
    /// Open or create the log file at the given path.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Serialise the entry, write it, and force it to durable media.
    /// The caller must not mutate in-memory state if this fails.
    pub fn append(&mut self, entry: &WalEntry) -> Result<(), WalError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Scan the log from the start and decode every valid entry, in order.
    ///
    /// Lines are read as raw bytes: a line torn mid multi-byte sequence is
    /// just another decode failure to skip, never a fatal scan error.
    pub fn read_all(&mut self) -> Result<Vec<WalEntry>, WalError> {
        self.file.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut reader = BufReader::new(&self.file);
        let mut buf = Vec::new();
        let mut line_no = 0usize;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            if buf.is_empty() {
                continue;
            }
            match serde_json::from_slice::<WalEntry>(&buf) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(line = line_no, "skipping corrupt WAL line: {err}");
                }
            }
        }
        Ok(entries)
    }

    /// Reset the log to empty. Called only after a snapshot has captured
    /// everything the log held.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Flush buffered writes to media.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }
}
