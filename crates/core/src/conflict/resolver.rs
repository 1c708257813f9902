//! Resolution plans and their validation.
//!
//! A [`ResolutionPlan`] maps every conflicted path to exactly one
//! [`Resolution`]. The plan is validated before any write happens: missing
//! paths, unknown paths, and merges on binary files are all rejected up
//! front so a partially valid plan never mutates the personal tree.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::conflict::detector::ConflictRecord;
use crate::conflict::merger::Merger;
use crate::errors::ConflictError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The chosen outcome for one conflicted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the personal tree's version (including a personal deletion).
    KeepLocal,
    /// Adopt the base tree's version (including a base deletion).
    UseRemote,
    /// Replace the file with externally supplied merged content.
    Merge(Vec<u8>),
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepLocal => write!(f, "keep-local"),
            Self::UseRemote => write!(f, "use-remote"),
            Self::Merge(_) => write!(f, "merge"),
        }
    }
}

/// A complete mapping of conflicted path to resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    choices: BTreeMap<String, Resolution>,
}

impl ResolutionPlan {
    /// An empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the resolution for one path, replacing any earlier choice.
    pub fn insert(&mut self, path: impl Into<String>, resolution: Resolution) {
        self.choices.insert(path.into(), resolution);
    }

    /// The resolution chosen for a path, if any.
    pub fn get(&self, path: &str) -> Option<&Resolution> {
        self.choices.get(path)
    }

    /// Number of resolutions in the plan.
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// Whether the plan contains no resolutions.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Paths covered by the plan, lexicographically ordered.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.choices.keys().map(String::as_str)
    }

    /// Convenience: resolve every conflict in favour of the personal tree.
    pub fn keep_local_all(conflicts: &[ConflictRecord]) -> Self {
        let mut plan = Self::new();
        for c in conflicts {
            plan.insert(c.path.clone(), Resolution::KeepLocal);
        }
        plan
    }

    /// Convenience: resolve every conflict in favour of the base tree.
    pub fn use_remote_all(conflicts: &[ConflictRecord]) -> Self {
        let mut plan = Self::new();
        for c in conflicts {
            plan.insert(c.path.clone(), Resolution::UseRemote);
        }
        plan
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Stateless plan validation.
pub struct ResolutionEngine;

impl ResolutionEngine {
    /// Check that `plan` covers every record exactly, names no extra paths,
    /// and never merges a binary file.
    pub fn validate(
        conflicts: &[ConflictRecord],
        plan: &ResolutionPlan,
    ) -> Result<(), ConflictError> {
        info!(
            conflicts = conflicts.len(),
            resolutions = plan.len(),
            "validating resolution plan"
        );

        let unresolved: Vec<String> = conflicts
            .iter()
            .filter(|c| plan.get(&c.path).is_none())
            .map(|c| c.path.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(ConflictError::IncompleteResolution { paths: unresolved });
        }

        for path in plan.paths() {
            if !conflicts.iter().any(|c| c.path == path) {
                return Err(ConflictError::UnknownPath(path.to_string()));
            }
        }

        for conflict in conflicts {
            if conflict.is_binary {
                if let Some(Resolution::Merge(_)) = plan.get(&conflict.path) {
                    return Err(ConflictError::UnsupportedMergeType(conflict.path.clone()));
                }
            }
        }

        debug!("resolution plan is complete");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Merge capability
// ---------------------------------------------------------------------------

/// Injected capability that produces merged bytes for one conflicted path.
///
/// Interactive callers back this with an editor or merge tool; the engine
/// itself only ever sees the returned bytes.
pub trait MergeProvider {
    /// Produce merged content given the three text versions of `path`.
    fn merge(
        &self,
        path: &str,
        ancestor: &str,
        personal: &str,
        base: &str,
    ) -> Result<Vec<u8>, ConflictError>;
}

/// Non-interactive provider: accepts only clean automatic merges.
pub struct AutoMergeProvider;

impl MergeProvider for AutoMergeProvider {
    fn merge(
        &self,
        path: &str,
        ancestor: &str,
        personal: &str,
        base: &str,
    ) -> Result<Vec<u8>, ConflictError> {
        let result = Merger::three_way_merge(ancestor, personal, base);
        if result.has_conflicts {
            return Err(ConflictError::MergeFailed {
                path: path.to_string(),
                detail: format!(
                    "{} overlapping region(s) need manual attention",
                    result.conflict_markers.len()
                ),
            });
        }
        Ok(result.merged_content.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::detector::Classification;

    fn record(path: &str, is_binary: bool) -> ConflictRecord {
        ConflictRecord {
            path: path.into(),
            classification: Classification::ModifiedBoth,
            base_hash: Some("h1".into()),
            personal_hash: Some("h2".into()),
            snapshot_hash: Some("h0".into()),
            is_binary,
            preview: String::new(),
        }
    }

    #[test]
    fn test_complete_plan_validates() {
        let conflicts = vec![record("a.md", false), record("b.md", false)];
        let mut plan = ResolutionPlan::new();
        plan.insert("a.md", Resolution::KeepLocal);
        plan.insert("b.md", Resolution::UseRemote);
        assert!(ResolutionEngine::validate(&conflicts, &plan).is_ok());
    }

    #[test]
    fn test_missing_resolution_names_paths() {
        let conflicts = vec![record("a.md", false), record("b.md", false)];
        let mut plan = ResolutionPlan::new();
        plan.insert("a.md", Resolution::KeepLocal);
        let result = ResolutionEngine::validate(&conflicts, &plan);
        assert!(matches!(
            result,
            Err(ConflictError::IncompleteResolution { ref paths }) if paths == &["b.md"]
        ));
    }

    #[test]
    fn test_unknown_path_rejected() {
        let conflicts = vec![record("a.md", false)];
        let mut plan = ResolutionPlan::new();
        plan.insert("a.md", Resolution::KeepLocal);
        plan.insert("ghost.md", Resolution::UseRemote);
        let result = ResolutionEngine::validate(&conflicts, &plan);
        assert!(matches!(
            result,
            Err(ConflictError::UnknownPath(ref p)) if p == "ghost.md"
        ));
    }

    #[test]
    fn test_merge_on_binary_rejected() {
        let conflicts = vec![record("chart.png", true)];
        let mut plan = ResolutionPlan::new();
        plan.insert("chart.png", Resolution::Merge(b"bytes".to_vec()));
        let result = ResolutionEngine::validate(&conflicts, &plan);
        assert!(matches!(
            result,
            Err(ConflictError::UnsupportedMergeType(ref p)) if p == "chart.png"
        ));
    }

    #[test]
    fn test_binary_keep_or_remote_accepted() {
        let conflicts = vec![record("chart.png", true)];
        let mut plan = ResolutionPlan::new();
        plan.insert("chart.png", Resolution::UseRemote);
        assert!(ResolutionEngine::validate(&conflicts, &plan).is_ok());
    }

    #[test]
    fn test_keep_local_all_covers_everything() {
        let conflicts = vec![record("a.md", false), record("b.md", true)];
        let plan = ResolutionPlan::keep_local_all(&conflicts);
        assert_eq!(plan.len(), 2);
        assert!(ResolutionEngine::validate(&conflicts, &plan).is_ok());
    }

    #[test]
    fn test_auto_merge_provider_clean() {
        let provider = AutoMergeProvider;
        let merged = provider
            .merge(
                "a.md",
                "aaa\nbbb\nccc\n",
                "AAA\nbbb\nccc\n",
                "aaa\nbbb\nCCC\n",
            )
            .unwrap();
        let text = String::from_utf8(merged).unwrap();
        assert!(text.contains("AAA"));
        assert!(text.contains("CCC"));
    }

    #[test]
    fn test_auto_merge_provider_rejects_overlap() {
        let provider = AutoMergeProvider;
        let result = provider.merge(
            "a.md",
            "line1\noriginal\nline3\n",
            "line1\npersonal\nline3\n",
            "line1\nbase\nline3\n",
        );
        assert!(matches!(result, Err(ConflictError::MergeFailed { .. })));
    }
}
