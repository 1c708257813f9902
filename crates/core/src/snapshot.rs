//! Persistence of the last committed sync state.
//!
//! The snapshot records the per-path hash state as of the last successfully
//! committed sync and serves as the common ancestor for three-way
//! comparison. It lives in a single JSON file with a stable schema:
//! `{version, committed_at, files: [{path, hash, size, mtime}]}`.
//!
//! The file is only ever replaced atomically (write to a temp file in the
//! same directory, then rename), so readers never observe a partially
//! written snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::SnapshotError;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One file's recorded state as of the last committed sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Normalized forward-slash relative path.
    pub path: String,
    /// SHA-256 content hash, lowercase hex.
    pub hash: String,
    /// File size in bytes at commit time.
    pub size: u64,
    /// Modification time at commit time, unix seconds.
    pub mtime: i64,
}

/// On-disk schema. Entries are stored as a list for schema stability; the
/// in-memory form keys them by path.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    committed_at: Option<DateTime<Utc>>,
    files: Vec<SnapshotEntry>,
}

/// The recorded state of the last fully committed sync.
#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    /// When the snapshot was committed; `None` for the empty first-run
    /// snapshot.
    pub committed_at: Option<DateTime<Utc>>,
    entries: BTreeMap<String, SnapshotEntry>,
}

impl SyncSnapshot {
    /// The empty snapshot used on first run.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a snapshot from `path`, or return the empty snapshot when no
    /// file exists yet.
    pub fn load_or_empty(path: &Path) -> Result<Self, SnapshotError> {
        if !path.exists() {
            debug!(path = %path.display(), "no snapshot yet, starting empty");
            return Ok(Self::empty());
        }

        let contents = std::fs::read_to_string(path)?;
        let file: SnapshotFile = serde_json::from_str(&contents)
            .map_err(|e| SnapshotError::ParseError(e.to_string()))?;

        if file.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: file.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        let mut entries = BTreeMap::new();
        for entry in file.files {
            entries.insert(entry.path.clone(), entry);
        }

        debug!(files = entries.len(), "snapshot loaded");
        Ok(Self {
            committed_at: file.committed_at,
            entries,
        })
    }

    /// Atomically persist the snapshot to `path`, stamping `committed_at`.
    pub fn commit(&mut self, path: &Path) -> Result<(), SnapshotError> {
        self.committed_at = Some(Utc::now());

        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            committed_at: self.committed_at,
            files: self.entries.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| SnapshotError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        info!(path = %path.display(), files = self.entries.len(), "snapshot committed");
        Ok(())
    }

    /// Look up one entry by relative path.
    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries.get(path)
    }

    /// Recorded hash for a path, if present.
    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(|e| e.hash.as_str())
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, entry: SnapshotEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Remove an entry, if present.
    pub fn remove(&mut self, path: &str) {
        self.entries.remove(path);
    }

    /// All recorded paths, lexicographically ordered.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of recorded files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot records no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
