//! Content-addressed library tree indexing.
//!
//! The indexer scans one library tree and produces a [`LibraryTree`]: a map
//! from normalized relative paths to [`LibraryFile`] entries identified by
//! their SHA-256 content hash. Both the base and the personal tree are
//! indexed with the same machinery; the [`FileSource`] tag records which
//! tree an entry came from.

mod scanner;

pub use scanner::{hash_bytes, hash_file, Indexer};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ScanError;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Which library tree a file was scanned from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    /// The shared, externally updated base library.
    Base,
    /// The user-owned personal overlay.
    Personal,
}

impl std::fmt::Display for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Personal => write!(f, "personal"),
        }
    }
}

/// One file within a scanned library tree. Immutable once computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryFile {
    /// Normalized relative path with forward-slash separators.
    pub path: String,
    /// SHA-256 content hash, lowercase hex.
    pub hash: String,
    /// File size in bytes.
    pub size: u64,
    /// Modification time, unix seconds.
    pub mtime: i64,
    /// The tree this entry was scanned from.
    pub source: FileSource,
}

/// The result of one scan pass over a library tree.
///
/// Rebuilt per sync invocation and only ever borrowed downstream; the
/// recorded warnings wrap `std::io::Error` and are not clonable. The
/// `BTreeMap` keeps entries ordered lexicographically by path so downstream
/// consumers are deterministic.
#[derive(Debug)]
pub struct LibraryTree {
    /// Absolute root the scan started from.
    pub root: PathBuf,
    /// The tree this scan covered.
    pub source: FileSource,
    /// Relative path to file entry, lexicographically ordered.
    pub files: BTreeMap<String, LibraryFile>,
    /// Non-fatal problems encountered during the scan.
    pub warnings: Vec<ScanError>,
}

impl LibraryTree {
    /// Look up one entry by relative path.
    pub fn get(&self, path: &str) -> Option<&LibraryFile> {
        self.files.get(path)
    }

    /// Content hash for a path, if present.
    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|f| f.hash.as_str())
    }

    /// Number of indexed files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the tree contains no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Absolute filesystem path for a relative entry path.
    pub fn abs_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}
