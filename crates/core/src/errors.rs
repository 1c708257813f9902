//! Error types for the Shelfsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Scan errors
// ---------------------------------------------------------------------------

/// Errors from tree indexing.
///
/// `Unreadable` and `CyclicSymlink` are scoped to a single file or subtree:
/// the indexer records them as warnings and the rest of the scan continues.
/// `RootNotFound` and `Io` abort the scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scan root does not exist or is not a directory.
    #[error("scan root not found: {0}")]
    RootNotFound(String),

    /// A file could not be read; it is skipped.
    #[error("unreadable file '{path}': {detail}")]
    Unreadable { path: String, detail: String },

    /// A symlink cycle was detected; the subtree is skipped.
    #[error("symlink cycle detected at '{path}'")]
    CyclicSymlink { path: String },

    /// Generic I/O failure that aborts the scan.
    #[error("scan I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Snapshot errors
// ---------------------------------------------------------------------------

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot file could not be parsed.
    #[error("snapshot parse error: {0}")]
    ParseError(String),

    /// The snapshot file has an unsupported schema version.
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Generic I/O wrapper.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict resolution.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A resolution plan did not cover every conflicted path.
    #[error("incomplete resolution plan, unresolved paths: {}", paths.join(", "))]
    IncompleteResolution { paths: Vec<String> },

    /// A resolution plan named a path that is not in conflict.
    #[error("resolution for unknown path: {0}")]
    UnknownPath(String),

    /// A merge resolution was requested for a binary file.
    #[error("cannot merge binary file '{0}', choose keep-local or use-remote")]
    UnsupportedMergeType(String),

    /// Three-way merge failed to produce clean content.
    #[error("three-way merge failed for '{path}': {detail}")]
    MergeFailed { path: String, detail: String },
}

// ---------------------------------------------------------------------------
// Backup errors
// ---------------------------------------------------------------------------

/// Errors from backup creation and restore.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The requested backup id does not exist.
    #[error("backup not found: {0}")]
    NotFound(String),

    /// The backup id contains characters outside the timestamp alphabet.
    #[error("invalid backup id: {0}")]
    InvalidId(String),

    /// Generic I/O wrapper.
    #[error("backup I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Lock errors
// ---------------------------------------------------------------------------

/// Errors from the per-tree session lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another sync session holds the lock.
    #[error("sync already in progress (pid {pid}, started at {started_at})")]
    SyncInProgress { pid: u32, started_at: String },

    /// The lock file exists but could not be parsed.
    #[error("corrupt lock file: {0}")]
    Corrupt(String),

    /// Generic I/O wrapper.
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync engine errors
// ---------------------------------------------------------------------------

/// Errors from the sync orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An apply-phase write failed; the personal tree was rolled back.
    #[error("sync aborted at '{path}': {detail} (personal tree restored from backup {backup_id})")]
    Aborted {
        path: String,
        detail: String,
        backup_id: String,
    },

    /// The session was cancelled before any side effects.
    #[error("sync cancelled")]
    Cancelled,

    /// Underlying scan error during the scanning phase.
    #[error("sync scan error: {0}")]
    ScanError(#[from] ScanError),

    /// Underlying snapshot error.
    #[error("sync snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),

    /// Underlying conflict resolution error.
    #[error("sync resolution error: {0}")]
    ConflictError(#[from] ConflictError),

    /// Underlying backup error.
    #[error("sync backup error: {0}")]
    BackupError(#[from] BackupError),

    /// Underlying lock error.
    #[error("sync lock error: {0}")]
    LockError(#[from] LockError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}
