//! Three-way conflict detection.
//!
//! Every path in the union of the base index, the personal index, and the
//! last committed snapshot is classified by comparing the three hashes.
//! A path is in conflict only when both trees diverged from the snapshot
//! *and* from each other; everything else has a deterministic automatic
//! outcome.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::index::LibraryTree;
use crate::snapshot::SyncSnapshot;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Classification of one path after three-way comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Neither side changed relative to the snapshot.
    Unchanged,
    /// New in base, unknown to snapshot and personal: adopt it.
    BaseAdded,
    /// New in personal only: the overlay keeps it, snapshot records it.
    PersonalAdded,
    /// Base unchanged, personal modified: personal wins.
    PersonalModified,
    /// Personal unchanged, base advanced: the base change propagates.
    BaseAdvanced,
    /// Both sides changed to identical content: auto-resolves.
    Convergent,
    /// Base unchanged, personal deleted: the deletion stands (tombstone).
    PersonalDeleted,
    /// Personal unchanged, base deleted: the removal propagates.
    BaseDeleted,
    /// Deleted on both sides: removal confirmed.
    DeletedBoth,
    /// Modified on both sides with differing content. **Conflict.**
    ModifiedBoth,
    /// Deleted on one side, modified on the other. **Conflict.**
    DeleteModify,
}

impl Classification {
    /// Whether this classification requires a user-supplied resolution.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ModifiedBoth | Self::DeleteModify)
    }

    /// Whether an eager sync writes to or deletes from the personal tree
    /// for this classification without user input.
    pub fn is_base_driven(&self) -> bool {
        matches!(self, Self::BaseAdded | Self::BaseAdvanced | Self::BaseDeleted)
    }

    /// Whether the path differs at all from the fully synced state.
    pub fn is_divergent(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unchanged => "unchanged",
            Self::BaseAdded => "base-only-new",
            Self::PersonalAdded => "personal-only-new",
            Self::PersonalModified => "personal-modified-only",
            Self::BaseAdvanced => "base-advanced",
            Self::Convergent => "convergent",
            Self::PersonalDeleted => "personal-deleted",
            Self::BaseDeleted => "base-deleted",
            Self::DeletedBoth => "deleted-both-sides",
            Self::ModifiedBoth => "modified-both-sides",
            Self::DeleteModify => "delete-modify",
        };
        write!(f, "{s}")
    }
}

/// One classified path with the three hashes that produced the verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedPath {
    /// Normalized relative path.
    pub path: String,
    /// Verdict from the three-way comparison.
    pub classification: Classification,
    /// Content hash in the base tree, if present.
    pub base_hash: Option<String>,
    /// Content hash in the personal tree, if present.
    pub personal_hash: Option<String>,
    /// Content hash recorded in the snapshot, if present.
    pub snapshot_hash: Option<String>,
}

/// A conflict requiring a user-directed resolution.
///
/// Produced fresh each detection pass; never persisted across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Normalized relative path.
    pub path: String,
    /// Why this path is in conflict (or, in confirm-each mode, pending).
    pub classification: Classification,
    /// Content hash in the base tree, if present.
    pub base_hash: Option<String>,
    /// Content hash in the personal tree, if present.
    pub personal_hash: Option<String>,
    /// Content hash recorded in the snapshot, if present.
    pub snapshot_hash: Option<String>,
    /// Whether either side's content looks binary (merge unsupported).
    pub is_binary: bool,
    /// Textual diff preview (personal vs base) for deciding a resolution.
    pub preview: String,
}

impl ConflictRecord {
    /// Build a record from a classified path; content details are attached
    /// by the caller, which has access to the trees' bytes.
    pub fn from_classified(cp: &ClassifiedPath) -> Self {
        Self {
            path: cp.path.clone(),
            classification: cp.classification,
            base_hash: cp.base_hash.clone(),
            personal_hash: cp.personal_hash.clone(),
            snapshot_hash: cp.snapshot_hash.clone(),
            is_binary: false,
            preview: String::new(),
        }
    }
}

/// The full result of one detection pass, lexicographically ordered by path.
#[derive(Debug, Clone, Default)]
pub struct DetectReport {
    /// Every path in the union of the three indices, classified.
    pub paths: Vec<ClassifiedPath>,
}

impl DetectReport {
    /// The subset of paths that require user resolution.
    pub fn conflicts(&self) -> impl Iterator<Item = &ClassifiedPath> {
        self.paths.iter().filter(|p| p.classification.is_conflict())
    }

    /// Whether any path requires user resolution.
    pub fn has_conflicts(&self) -> bool {
        self.conflicts().next().is_some()
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless three-way detector over two indices and a snapshot.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Classify every path in the union of `base`, `personal`, and
    /// `snapshot`. Output order is lexicographic by path.
    pub fn detect(
        base: &LibraryTree,
        personal: &LibraryTree,
        snapshot: &SyncSnapshot,
    ) -> DetectReport {
        info!(
            base_files = base.len(),
            personal_files = personal.len(),
            snapshot_files = snapshot.len(),
            "classifying paths"
        );

        // BTreeSet union keeps the output ordered and duplicate-free.
        let mut union: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
        union.extend(base.files.keys().map(String::as_str));
        union.extend(personal.files.keys().map(String::as_str));
        union.extend(snapshot.paths());

        let mut paths = Vec::with_capacity(union.len());
        for path in union {
            let b = base.hash_of(path);
            let p = personal.hash_of(path);
            let s = snapshot.hash_of(path);
            let classification = classify(b, p, s);
            debug!(path, %classification, "classified");
            paths.push(ClassifiedPath {
                path: path.to_string(),
                classification,
                base_hash: b.map(str::to_string),
                personal_hash: p.map(str::to_string),
                snapshot_hash: s.map(str::to_string),
            });
        }

        let report = DetectReport { paths };
        info!(
            total = report.paths.len(),
            conflicts = report.conflicts().count(),
            "classification complete"
        );
        report
    }
}

/// The three-way classification table.
///
/// `base` and `personal` are the current tree hashes, `snapshot` the common
/// ancestor hash. Total over all eight presence combinations.
fn classify(
    base: Option<&str>,
    personal: Option<&str>,
    snapshot: Option<&str>,
) -> Classification {
    match (base, personal, snapshot) {
        // Unknown to the snapshot.
        (Some(_), None, None) => Classification::BaseAdded,
        (None, Some(_), None) => Classification::PersonalAdded,
        (Some(b), Some(p), None) if b == p => Classification::Convergent,
        (Some(_), Some(_), None) => Classification::ModifiedBoth,

        // Present everywhere.
        (Some(b), Some(p), Some(s)) => {
            if b == s && p == s {
                Classification::Unchanged
            } else if b == s {
                Classification::PersonalModified
            } else if p == s {
                Classification::BaseAdvanced
            } else if b == p {
                Classification::Convergent
            } else {
                Classification::ModifiedBoth
            }
        }

        // Personal side gone.
        (Some(b), None, Some(s)) if b == s => Classification::PersonalDeleted,
        (Some(_), None, Some(_)) => Classification::DeleteModify,

        // Base side gone.
        (None, Some(p), Some(s)) if p == s => Classification::BaseDeleted,
        (None, Some(_), Some(_)) => Classification::DeleteModify,

        // Both sides gone.
        (None, None, Some(_)) => Classification::DeletedBoth,

        // Not in the union; unreachable from detect().
        (None, None, None) => Classification::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FileSource, LibraryFile};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn tree(source: FileSource, entries: &[(&str, &str)]) -> LibraryTree {
        let mut files = BTreeMap::new();
        for (path, hash) in entries {
            files.insert(
                path.to_string(),
                LibraryFile {
                    path: path.to_string(),
                    hash: hash.to_string(),
                    size: 1,
                    mtime: 0,
                    source,
                },
            );
        }
        LibraryTree {
            root: PathBuf::from("/x"),
            source,
            files,
            warnings: Vec::new(),
        }
    }

    fn snap(entries: &[(&str, &str)]) -> SyncSnapshot {
        let mut s = SyncSnapshot::empty();
        for (path, hash) in entries {
            s.insert(crate::snapshot::SnapshotEntry {
                path: path.to_string(),
                hash: hash.to_string(),
                size: 1,
                mtime: 0,
            });
        }
        s
    }

    fn classification_of(report: &DetectReport, path: &str) -> Classification {
        report
            .paths
            .iter()
            .find(|p| p.path == path)
            .expect("path missing from report")
            .classification
    }

    #[test]
    fn test_base_only_new_adopts() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("new.md", "h1")]),
            &tree(FileSource::Personal, &[]),
            &snap(&[]),
        );
        assert_eq!(classification_of(&report, "new.md"), Classification::BaseAdded);
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_personal_deletion_tombstones() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h0")]),
            &tree(FileSource::Personal, &[]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::PersonalDeleted
        );
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_personal_deleted_but_base_changed_conflicts() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h1")]),
            &tree(FileSource::Personal, &[]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::DeleteModify
        );
        assert!(report.has_conflicts());
    }

    #[test]
    fn test_personal_modified_only_wins() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h0")]),
            &tree(FileSource::Personal, &[("a.md", "h2")]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::PersonalModified
        );
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_base_advanced_propagates() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h1")]),
            &tree(FileSource::Personal, &[("a.md", "h0")]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::BaseAdvanced
        );
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_convergent_change_auto_resolves() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h1")]),
            &tree(FileSource::Personal, &[("a.md", "h1")]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::Convergent
        );
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_modified_both_sides_conflicts() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h1")]),
            &tree(FileSource::Personal, &[("a.md", "h2")]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::ModifiedBoth
        );
        assert!(report.has_conflicts());
        let conflicts: Vec<_> = report.conflicts().collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].base_hash.as_deref(), Some("h1"));
        assert_eq!(conflicts[0].personal_hash.as_deref(), Some("h2"));
        assert_eq!(conflicts[0].snapshot_hash.as_deref(), Some("h0"));
    }

    #[test]
    fn test_deleted_both_sides_confirms_removal() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[]),
            &tree(FileSource::Personal, &[]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::DeletedBoth
        );
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_add_add_same_content_is_convergent() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h1")]),
            &tree(FileSource::Personal, &[("a.md", "h1")]),
            &snap(&[]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::Convergent
        );
    }

    #[test]
    fn test_add_add_different_content_conflicts() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h1")]),
            &tree(FileSource::Personal, &[("a.md", "h2")]),
            &snap(&[]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::ModifiedBoth
        );
    }

    #[test]
    fn test_base_deleted_propagates() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[]),
            &tree(FileSource::Personal, &[("a.md", "h0")]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::BaseDeleted
        );
        assert!(!report.has_conflicts());
    }

    #[test]
    fn test_base_deleted_personal_modified_conflicts() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[]),
            &tree(FileSource::Personal, &[("a.md", "h2")]),
            &snap(&[("a.md", "h0")]),
        );
        assert_eq!(
            classification_of(&report, "a.md"),
            Classification::DeleteModify
        );
        assert!(report.has_conflicts());
    }

    #[test]
    fn test_every_union_path_is_classified_once() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("a.md", "h1"), ("b.md", "h2")]),
            &tree(FileSource::Personal, &[("b.md", "h3"), ("c.md", "h4")]),
            &snap(&[("a.md", "h1"), ("d.md", "h5")]),
        );
        let paths: Vec<&str> = report.paths.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.md", "c.md", "d.md"]);
    }

    #[test]
    fn test_output_is_lexicographic() {
        let report = ConflictDetector::detect(
            &tree(FileSource::Base, &[("z.md", "h"), ("a.md", "h"), ("m/k.md", "h")]),
            &tree(FileSource::Personal, &[]),
            &snap(&[]),
        );
        let paths: Vec<&str> = report.paths.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "m/k.md", "z.md"]);
    }
}
