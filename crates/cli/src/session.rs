//! Interactive conflict resolution for `shelfsync sync`.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dialoguer::Select;

use shelfsync_core::conflict::{ConflictRecord, Resolution, ResolutionPlan};
use shelfsync_core::engine::SyncEngine;
use shelfsync_core::errors::ConflictError;
use shelfsync_core::{MergeProvider, Merger};

use crate::style;

/// Walk the user through every pending conflict and build a complete plan.
/// Returns `None` if the user aborts.
pub fn resolve_interactively(
    engine: &SyncEngine,
    conflicts: &[ConflictRecord],
) -> Result<Option<ResolutionPlan>> {
    let mut plan = ResolutionPlan::new();

    for (i, record) in conflicts.iter().enumerate() {
        println!();
        println!(
            "{}",
            style::header(&format!(
                "[{}/{}] {} ({})",
                i + 1,
                conflicts.len(),
                record.path,
                record.classification
            ))
        );
        if !record.preview.is_empty() {
            for line in record.preview.lines() {
                println!("  {}", style::dim(line));
            }
        }

        let mut options = vec![
            format!("Keep {} version", style::personal_label()),
            format!("Use {} version", style::base_label()),
        ];
        if !record.is_binary {
            options.push("Merge in editor".to_string());
        }
        options.push("Abort (resolve nothing)".to_string());

        let choice = Select::new()
            .with_prompt("Resolution")
            .items(&options)
            .default(0)
            .interact()
            .context("failed to read resolution choice")?;

        match (choice, record.is_binary) {
            (0, _) => plan.insert(record.path.clone(), Resolution::KeepLocal),
            (1, _) => plan.insert(record.path.clone(), Resolution::UseRemote),
            (2, false) => {
                let merged = EditorMergeProvider::from_env().merge_record(engine, record)?;
                plan.insert(record.path.clone(), Resolution::Merge(merged));
            }
            _ => return Ok(None),
        }
    }

    Ok(Some(plan))
}

/// Merge capability backed by the user's `$EDITOR`.
///
/// Pre-fills a temp file with the automatic three-way merge (including
/// conflict markers where regions overlap), opens the editor on it, and
/// takes whatever the user saves as the merged content.
pub struct EditorMergeProvider {
    editor: String,
}

impl EditorMergeProvider {
    pub fn from_env() -> Self {
        let editor = std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .unwrap_or_else(|_| "vi".to_string());
        Self { editor }
    }

    /// Resolve one conflict record, pulling the three text versions through
    /// the engine's diff view.
    pub fn merge_record(&self, engine: &SyncEngine, record: &ConflictRecord) -> Result<Vec<u8>> {
        let diff = engine.diff(&record.path)?;
        let ancestor = diff.ancestor.unwrap_or_default();
        let personal = diff.personal.unwrap_or_default();
        let base = diff.base.unwrap_or_default();
        let merged = self
            .merge(&record.path, &ancestor, &personal, &base)
            .with_context(|| format!("editor merge failed for {}", record.path))?;
        Ok(merged)
    }

    fn scratch_path(path: &str) -> PathBuf {
        let name = path.replace('/', "_");
        std::env::temp_dir().join(format!("shelfsync-merge-{}-{}", std::process::id(), name))
    }
}

impl MergeProvider for EditorMergeProvider {
    fn merge(
        &self,
        path: &str,
        ancestor: &str,
        personal: &str,
        base: &str,
    ) -> std::result::Result<Vec<u8>, ConflictError> {
        let seed = Merger::three_way_merge(ancestor, personal, base);

        let scratch = Self::scratch_path(path);
        let write_err = |e: std::io::Error| ConflictError::MergeFailed {
            path: path.to_string(),
            detail: e.to_string(),
        };

        let mut file = std::fs::File::create(&scratch).map_err(write_err)?;
        file.write_all(seed.merged_content.as_bytes())
            .map_err(write_err)?;
        drop(file);

        let status = std::process::Command::new(&self.editor)
            .arg(&scratch)
            .status()
            .map_err(|e| ConflictError::MergeFailed {
                path: path.to_string(),
                detail: format!("could not launch editor '{}': {e}", self.editor),
            })?;
        if !status.success() {
            let _ = std::fs::remove_file(&scratch);
            return Err(ConflictError::MergeFailed {
                path: path.to_string(),
                detail: format!("editor '{}' exited with {status}", self.editor),
            });
        }

        let merged = std::fs::read(&scratch).map_err(write_err)?;
        let _ = std::fs::remove_file(&scratch);

        if Merger::contains_markers(&merged) {
            return Err(ConflictError::MergeFailed {
                path: path.to_string(),
                detail: "saved content still contains conflict markers".to_string(),
            });
        }
        Ok(merged)
    }
}
