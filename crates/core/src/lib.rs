//! Shelfsync core library.
//!
//! Keeps a personal overlay of a shared knowledge library in step with its
//! periodically updated base tree. Both trees are content-addressed on each
//! run, every path is classified by three-way comparison against the last
//! committed snapshot, and changes are applied under a backup with
//! automatic rollback on failure.
//!
//! The main entry point is [`engine::SyncEngine`]; [`config::AppConfig`]
//! wires it up from a TOML file.

pub mod backup;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod engine;
pub mod errors;
pub mod index;
pub mod lock;
pub mod snapshot;

pub use backup::{BackupId, BackupManager};
pub use config::{AppConfig, ApplyPolicy, SyncContext};
pub use conflict::{
    Classification, ConflictDetector, ConflictRecord, MergeProvider, Merger, Resolution,
    ResolutionEngine, ResolutionPlan,
};
pub use diff::ThreeWayDiff;
pub use engine::{AppliedAction, ResolvedChange, SyncEngine, SyncResult, SyncState, SyncStatus};
pub use errors::CoreError;
pub use index::{FileSource, Indexer, LibraryFile, LibraryTree};
pub use lock::{LockGuard, SessionLock};
pub use snapshot::{SnapshotEntry, SyncSnapshot};
