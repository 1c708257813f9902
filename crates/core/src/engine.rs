//! The sync session orchestrator.
//!
//! [`SyncEngine`] drives one synchronization session through a fixed state
//! machine:
//!
//! `Idle -> Scanning -> Detecting -> AwaitingResolution -> Applying ->
//! Committed` (terminal success) or `Aborted` (terminal failure).
//!
//! A session takes the per-tree lock for its whole duration, scans both
//! trees, classifies every path against the last committed snapshot, and
//! either returns the conflicts for resolution or applies the outcome:
//! backup first, then strictly sequential writes, then an atomic snapshot
//! commit. Any write failure triggers an automatic restore of the personal
//! tree from the session's backup; a half-applied tree is never left
//! visible.
//!
//! The committed snapshot records the base tree's state as of the session.
//! Personal divergence from that ancestor (modifications, additions,
//! deletions) is the user's standing overlay: it survives every later
//! session untouched until the base side moves, at which point the change
//! propagates or conflicts per the classification table.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backup::{BackupId, BackupManager};
use crate::config::{ApplyPolicy, SyncConfig, SyncContext};
use crate::conflict::detector::{Classification, ClassifiedPath, ConflictDetector, ConflictRecord};
use crate::conflict::merger::looks_binary;
use crate::conflict::resolver::{Resolution, ResolutionEngine, ResolutionPlan};
use crate::diff::{conflict_preview, ThreeWayDiff};
use crate::errors::SyncError;
use crate::index::{FileSource, Indexer, LibraryTree};
use crate::lock::SessionLock;
use crate::snapshot::{SnapshotEntry, SyncSnapshot};

/// Patch lines shown in a conflict record's preview.
const PREVIEW_MAX_LINES: usize = 40;

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

/// States of one sync session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Scanning,
    Detecting,
    AwaitingResolution,
    Applying,
    Committed,
    Aborted,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning => write!(f, "scanning"),
            Self::Detecting => write!(f, "detecting"),
            Self::AwaitingResolution => write!(f, "awaiting_resolution"),
            Self::Applying => write!(f, "applying"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Final outcome of one sync call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The session applied everything and committed a new snapshot.
    Committed,
    /// Conflicts were detected; the caller must supply a resolution plan.
    ConflictsPending,
    /// An apply-phase failure occurred; the personal tree was restored.
    Aborted,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Committed => write!(f, "committed"),
            Self::ConflictsPending => write!(f, "conflicts_pending"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// How one path was settled during apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppliedAction {
    /// New base file copied into the personal tree.
    Adopted,
    /// Base advance propagated over an unchanged personal file.
    Advanced,
    /// Base deletion propagated to the personal tree.
    Removed,
    /// Deleted on both sides; removal confirmed.
    ConfirmedRemoval,
    /// Both sides made the identical change; the snapshot catches up.
    Converged,
    /// Conflict settled in favour of the personal version.
    KeptLocal,
    /// Conflict settled in favour of the base version.
    UsedRemote,
    /// Conflict settled with merged content.
    Merged,
}

impl std::fmt::Display for AppliedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Adopted => "adopted",
            Self::Advanced => "advanced",
            Self::Removed => "removed",
            Self::ConfirmedRemoval => "confirmed-removal",
            Self::Converged => "converged",
            Self::KeptLocal => "kept-local",
            Self::UsedRemote => "used-remote",
            Self::Merged => "merged",
        };
        write!(f, "{s}")
    }
}

/// One settled path in a committed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedChange {
    pub path: String,
    pub action: AppliedAction,
}

/// Final report of one sync call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Terminal outcome of the session.
    pub status: SyncStatus,
    /// Conflicts encountered during detection (pending or settled).
    pub conflicts: Vec<ConflictRecord>,
    /// Changes applied, in apply order.
    pub resolved: Vec<ResolvedChange>,
    /// Backup created for this session, if the apply phase ran.
    pub backup_id: Option<String>,
    /// Non-fatal scan problems, aggregated rather than blocking.
    pub warnings: Vec<String>,
    /// Abort detail when `status` is [`SyncStatus::Aborted`].
    pub failure: Option<String>,
}

/// One sequential write during the apply phase.
#[derive(Debug)]
enum StepKind {
    /// Copy the base tree's bytes for this path into the personal tree.
    CopyFromBase,
    /// Write externally supplied (merged) content.
    WriteContent(Vec<u8>),
    /// Remove the path from the personal tree.
    Delete,
}

#[derive(Debug)]
struct Step {
    path: String,
    kind: StepKind,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Orchestrates sync sessions for one base/personal tree pair.
pub struct SyncEngine {
    ctx: SyncContext,
    indexer: Indexer,
    backups: BackupManager,
    stale_lock: Duration,
    state: Mutex<SyncState>,
    cancel: Arc<AtomicBool>,
}

impl SyncEngine {
    /// Create an engine for the given context and sync settings.
    pub fn new(ctx: SyncContext, config: &SyncConfig) -> Self {
        info!(
            base = %ctx.base_root.display(),
            personal = %ctx.personal_root.display(),
            "initializing sync engine"
        );
        let indexer = Indexer::new(config.ignore.clone(), config.hash_workers);
        let backups = BackupManager::new(ctx.backup_root.clone());
        Self {
            ctx,
            indexer,
            backups,
            stale_lock: Duration::from_secs(config.stale_lock_secs),
            state: Mutex::new(SyncState::Idle),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap()
    }

    /// Handle for cancelling a session from another thread. Cancellation is
    /// honoured up to and including awaiting-resolution; once the apply
    /// phase starts the session runs to committed or aborted.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// The backup manager for this engine's personal tree.
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    // -----------------------------------------------------------------------
    // Operation boundary
    // -----------------------------------------------------------------------

    /// Run one sync session without a resolution plan.
    ///
    /// If detection finds nothing needing user input, the session applies
    /// all automatic outcomes and commits. Otherwise it stops at
    /// awaiting-resolution and returns the conflicts; no side effects have
    /// happened and the caller retries with [`Self::sync_with_plan`].
    pub fn sync(&self, policy: ApplyPolicy) -> Result<SyncResult, SyncError> {
        self.run(policy, None)
    }

    /// Run one sync session, settling detected conflicts with `plan`.
    ///
    /// The plan is validated against the freshly detected conflicts before
    /// any write happens.
    pub fn sync_with_plan(
        &self,
        policy: ApplyPolicy,
        plan: &ResolutionPlan,
    ) -> Result<SyncResult, SyncError> {
        self.run(policy, Some(plan))
    }

    /// Textual three-way diff for one path.
    ///
    /// The ancestor text is taken from the most recent backup containing
    /// the path, since snapshot entries record hashes rather than bytes.
    pub fn diff(&self, path: &str) -> Result<ThreeWayDiff, SyncError> {
        let base = read_text(&self.ctx.base_root.join(path));
        let personal = read_text(&self.ctx.personal_root.join(path));
        let ancestor = self.ancestor_text(path)?;
        Ok(ThreeWayDiff::build(path, ancestor, base, personal))
    }

    /// Restore a prior backup wholesale, taking the session lock for the
    /// duration of the swap.
    pub fn rollback(&self, id: &BackupId) -> Result<(), SyncError> {
        let _lock = SessionLock::acquire(&self.ctx.lock_path, self.stale_lock)?;
        self.backups.restore(id, &self.ctx.personal_root)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Session driver
    // -----------------------------------------------------------------------

    fn run(
        &self,
        policy: ApplyPolicy,
        plan: Option<&ResolutionPlan>,
    ) -> Result<SyncResult, SyncError> {
        let _lock = SessionLock::acquire(&self.ctx.lock_path, self.stale_lock)?;

        let outcome = self.run_locked(policy, plan);
        if outcome.is_err() {
            self.set_state(SyncState::Idle);
        }
        outcome
    }

    fn run_locked(
        &self,
        policy: ApplyPolicy,
        plan: Option<&ResolutionPlan>,
    ) -> Result<SyncResult, SyncError> {
        // Scanning: read-only, parallel hashing inside the indexer.
        self.set_state(SyncState::Scanning);
        let snapshot = SyncSnapshot::load_or_empty(&self.ctx.snapshot_path)?;
        let base = self
            .indexer
            .index(&self.ctx.base_root, FileSource::Base, Some(&snapshot))?;
        let personal =
            self.indexer
                .index(&self.ctx.personal_root, FileSource::Personal, Some(&snapshot))?;
        self.check_cancelled()?;

        let mut warnings: Vec<String> = Vec::new();
        warnings.extend(base.warnings.iter().map(|w| w.to_string()));
        warnings.extend(personal.warnings.iter().map(|w| w.to_string()));

        // Detecting: pure classification over the three indices.
        self.set_state(SyncState::Detecting);
        let report = ConflictDetector::detect(&base, &personal, &snapshot);

        // Anything that needs user input: real conflicts always, plus
        // base-driven changes when the policy is confirm-each.
        let pending: Vec<ConflictRecord> = report
            .paths
            .iter()
            .filter(|cp| {
                cp.classification.is_conflict()
                    || (policy == ApplyPolicy::Confirm && cp.classification.is_base_driven())
            })
            .map(|cp| self.build_record(cp, &base, &personal))
            .collect();
        self.check_cancelled()?;

        if !pending.is_empty() && plan.is_none() {
            self.set_state(SyncState::AwaitingResolution);
            info!(conflicts = pending.len(), "awaiting resolution");
            return Ok(SyncResult {
                status: SyncStatus::ConflictsPending,
                conflicts: pending,
                resolved: Vec::new(),
                backup_id: None,
                warnings,
                failure: None,
            });
        }

        if let Some(plan) = plan {
            ResolutionEngine::validate(&pending, plan)?;
        }

        // Turn every classified path into its apply step and report entry.
        // Iteration over the report keeps everything lexicographic.
        let mut steps: Vec<Step> = Vec::new();
        let mut resolved: Vec<ResolvedChange> = Vec::new();
        for cp in &report.paths {
            let needs_plan = cp.classification.is_conflict()
                || (policy == ApplyPolicy::Confirm && cp.classification.is_base_driven());
            let resolution = if needs_plan {
                plan.and_then(|p| p.get(&cp.path))
            } else {
                None
            };
            settle_path(cp, resolution, &mut steps, &mut resolved);
        }

        if steps.is_empty() {
            // Nothing touches the personal tree; only the snapshot moves.
            // No backup needed.
            snapshot_of_base(&base).commit(&self.ctx.snapshot_path)?;
            self.set_state(SyncState::Committed);
            debug!("no-op session committed");
            return Ok(SyncResult {
                status: SyncStatus::Committed,
                conflicts: pending,
                resolved,
                backup_id: None,
                warnings,
                failure: None,
            });
        }

        // Applying: backup first, then strictly sequential writes. From
        // here on cancellation is no longer consulted.
        self.set_state(SyncState::Applying);
        let backup_id = self.backups.create_backup(&self.ctx.personal_root)?;
        info!(backup = %backup_id, writes = steps.len(), "applying changes");

        for step in &steps {
            if let Err(e) = self.apply_step(step) {
                return Ok(self.abort(&backup_id, &step.path, &e, pending, warnings));
            }
        }

        if let Err(e) = snapshot_of_base(&base).commit(&self.ctx.snapshot_path) {
            let path = self.ctx.snapshot_path.display().to_string();
            return Ok(self.abort(&backup_id, &path, &e.to_string(), pending, warnings));
        }

        self.set_state(SyncState::Committed);
        info!(applied = resolved.len(), "sync committed");
        Ok(SyncResult {
            status: SyncStatus::Committed,
            conflicts: pending,
            resolved,
            backup_id: Some(backup_id.to_string()),
            warnings,
            failure: None,
        })
    }

    // -----------------------------------------------------------------------
    // Apply & abort
    // -----------------------------------------------------------------------

    fn apply_step(&self, step: &Step) -> Result<(), String> {
        let target = self.ctx.personal_root.join(&step.path);
        match &step.kind {
            StepKind::CopyFromBase => {
                let source = self.ctx.base_root.join(&step.path);
                let bytes = std::fs::read(&source).map_err(|e| e.to_string())?;
                write_file(&target, &bytes).map_err(|e| e.to_string())
            }
            StepKind::WriteContent(bytes) => {
                write_file(&target, bytes).map_err(|e| e.to_string())
            }
            StepKind::Delete => std::fs::remove_file(&target).map_err(|e| e.to_string()),
        }
    }

    /// Roll the personal tree back to the session backup and report the
    /// aborted session.
    fn abort(
        &self,
        backup_id: &BackupId,
        path: &str,
        detail: &str,
        conflicts: Vec<ConflictRecord>,
        mut warnings: Vec<String>,
    ) -> SyncResult {
        let err = SyncError::Aborted {
            path: path.to_string(),
            detail: detail.to_string(),
            backup_id: backup_id.to_string(),
        };
        error!(error = %err, "apply failed, rolling back");

        if let Err(restore_err) = self.backups.restore(backup_id, &self.ctx.personal_root) {
            // The backup itself stays restorable by hand.
            error!(error = %restore_err, backup = %backup_id, "automatic restore failed");
            warnings.push(format!("automatic restore failed: {restore_err}"));
        }

        self.set_state(SyncState::Aborted);
        SyncResult {
            status: SyncStatus::Aborted,
            conflicts,
            resolved: Vec::new(),
            backup_id: Some(backup_id.to_string()),
            warnings,
            failure: Some(err.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Attach content details (binary sniff, diff preview) to a conflict.
    fn build_record(
        &self,
        cp: &ClassifiedPath,
        base: &LibraryTree,
        personal: &LibraryTree,
    ) -> ConflictRecord {
        let mut record = ConflictRecord::from_classified(cp);

        let base_bytes = cp
            .base_hash
            .as_ref()
            .and_then(|_| std::fs::read(base.abs_path(&cp.path)).ok());
        let personal_bytes = cp
            .personal_hash
            .as_ref()
            .and_then(|_| std::fs::read(personal.abs_path(&cp.path)).ok());

        record.is_binary = base_bytes.as_deref().map(looks_binary).unwrap_or(false)
            || personal_bytes.as_deref().map(looks_binary).unwrap_or(false);

        record.preview = if record.is_binary {
            "(binary files differ)".to_string()
        } else {
            let personal_text = personal_bytes
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned());
            let base_text = base_bytes
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned());
            conflict_preview(
                personal_text.as_deref(),
                base_text.as_deref(),
                PREVIEW_MAX_LINES,
            )
        };

        record
    }

    /// Ancestor text for a path: the newest backup that still has it.
    fn ancestor_text(&self, path: &str) -> Result<Option<String>, SyncError> {
        for id in self.backups.list()? {
            let candidate = self.backups.path_of(&id).join(path);
            if candidate.is_file() {
                return Ok(read_text(&candidate));
            }
        }
        Ok(None)
    }

    fn set_state(&self, state: SyncState) {
        debug!(%state, "session state");
        *self.state.lock().unwrap() = state;
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.swap(false, Ordering::SeqCst) {
            warn!("session cancelled before apply");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-path settlement
// ---------------------------------------------------------------------------

/// Decide the write step and report entry for one classified path.
/// `resolution` is present exactly when the path required user input.
///
/// Personal-side divergence (modifications, additions, deletions) never
/// produces a step: the overlay wins and stands across sessions.
fn settle_path(
    cp: &ClassifiedPath,
    resolution: Option<&Resolution>,
    steps: &mut Vec<Step>,
    resolved: &mut Vec<ResolvedChange>,
) {
    use Classification::*;

    let path = cp.path.clone();

    match (cp.classification, resolution) {
        (Unchanged | PersonalAdded | PersonalModified | PersonalDeleted, _) => {}
        (Convergent, _) => {
            resolved.push(ResolvedChange {
                path,
                action: AppliedAction::Converged,
            });
        }
        (DeletedBoth, _) => {
            resolved.push(ResolvedChange {
                path,
                action: AppliedAction::ConfirmedRemoval,
            });
        }

        // Base-driven changes, applied eagerly or confirmed via plan.
        (BaseAdded | BaseAdvanced, None | Some(Resolution::UseRemote)) => {
            steps.push(Step {
                path: path.clone(),
                kind: StepKind::CopyFromBase,
            });
            let action = if cp.classification == BaseAdded {
                AppliedAction::Adopted
            } else {
                AppliedAction::Advanced
            };
            resolved.push(ResolvedChange { path, action });
        }
        (BaseDeleted, None | Some(Resolution::UseRemote)) => {
            steps.push(Step {
                path: path.clone(),
                kind: StepKind::Delete,
            });
            resolved.push(ResolvedChange {
                path,
                action: AppliedAction::Removed,
            });
        }
        // Confirm-each mode: the user declined a base-driven change. The
        // refusal becomes standing personal divergence (a tombstone for a
        // declined adoption); it resurfaces only if base moves again.
        (BaseAdded | BaseAdvanced | BaseDeleted, Some(Resolution::KeepLocal)) => {
            resolved.push(ResolvedChange {
                path,
                action: AppliedAction::KeptLocal,
            });
        }
        (BaseAdded | BaseAdvanced | BaseDeleted, Some(Resolution::Merge(content))) => {
            steps.push(Step {
                path: path.clone(),
                kind: StepKind::WriteContent(content.clone()),
            });
            resolved.push(ResolvedChange {
                path,
                action: AppliedAction::Merged,
            });
        }

        // True conflicts, settled by the validated plan.
        (ModifiedBoth | DeleteModify, Some(Resolution::KeepLocal)) => {
            resolved.push(ResolvedChange {
                path,
                action: AppliedAction::KeptLocal,
            });
        }
        (ModifiedBoth | DeleteModify, Some(Resolution::UseRemote)) => {
            if cp.base_hash.is_some() {
                steps.push(Step {
                    path: path.clone(),
                    kind: StepKind::CopyFromBase,
                });
            } else {
                steps.push(Step {
                    path: path.clone(),
                    kind: StepKind::Delete,
                });
            }
            resolved.push(ResolvedChange {
                path,
                action: AppliedAction::UsedRemote,
            });
        }
        (ModifiedBoth | DeleteModify, Some(Resolution::Merge(content))) => {
            steps.push(Step {
                path: path.clone(),
                kind: StepKind::WriteContent(content.clone()),
            });
            resolved.push(ResolvedChange {
                path,
                action: AppliedAction::Merged,
            });
        }

        // Conflicts with no plan never reach settlement; the session stops
        // at awaiting-resolution first.
        (ModifiedBoth | DeleteModify, None) => {
            debug!(path = %cp.path, "conflict left unsettled");
        }
    }
}

/// The snapshot to commit: the base tree's index as of this session. The
/// ancestor tracks the base side; whatever the personal tree does relative
/// to it is standing overlay divergence.
fn snapshot_of_base(base: &LibraryTree) -> SyncSnapshot {
    let mut next = SyncSnapshot::empty();
    for f in base.files.values() {
        next.insert(SnapshotEntry {
            path: f.path.clone(),
            hash: f.hash.clone(),
            size: f.size,
            mtime: f.mtime,
        });
    }
    next
}

/// Read a file as text, or `None` if it is missing or looks binary.
fn read_text(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if looks_binary(&bytes) {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Plain write with parent directory creation. Apply-phase writes are not
/// individually atomic; all-or-nothing visibility comes from the session
/// backup and automatic restore.
fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}
