//! Textual three-way merge engine.
//!
//! Uses the `diffy` crate to perform line-based three-way merges between the
//! snapshot (ancestor), personal, and base versions of a file. Binary
//! content is never merged; callers check [`looks_binary`] first.

use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The result of a three-way merge attempt.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The merged content (contains conflict markers if `has_conflicts`).
    pub merged_content: String,
    /// Whether the merge completed without conflicts.
    pub has_conflicts: bool,
    /// Locations of conflict marker blocks within the merged content.
    pub conflict_markers: Vec<ConflictMarker>,
}

/// A single conflict region within merged output.
#[derive(Debug, Clone)]
pub struct ConflictMarker {
    /// Starting line number (1-indexed) of the marker block.
    pub start_line: usize,
    /// Ending line number (1-indexed) of the marker block.
    pub end_line: usize,
}

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Attempt a three-way merge of `ancestor`, `personal`, and `base`.
    ///
    /// Always returns merged content. If the merge is clean,
    /// `has_conflicts` is `false`; otherwise standard `<<<<<<<` /
    /// `=======` / `>>>>>>>` markers are inserted.
    pub fn three_way_merge(ancestor: &str, personal: &str, base: &str) -> MergeResult {
        info!("performing three-way merge");

        // If either side is identical to the ancestor, the other side wins.
        if personal == ancestor {
            debug!("personal unchanged, base wins cleanly");
            return clean(base);
        }
        if base == ancestor {
            debug!("base unchanged, personal wins cleanly");
            return clean(personal);
        }
        // Identical edits on both sides merge trivially.
        if personal == base {
            debug!("identical changes on both sides");
            return clean(personal);
        }

        // Replay each side's changes onto the other via diffy patches; a
        // clean application in either direction is an automatic merge.
        let base_patch = diffy::create_patch(ancestor, base);
        if let Ok(merged) = diffy::apply(personal, &base_patch) {
            debug!("clean merge: base patch applied to personal");
            return clean(&merged);
        }

        let personal_patch = diffy::create_patch(ancestor, personal);
        if let Ok(merged) = diffy::apply(base, &personal_patch) {
            debug!("clean merge: personal patch applied to base");
            return clean(&merged);
        }

        debug!("automatic merge failed, generating conflict markers");
        let (merged_content, conflict_markers) =
            conflict_marker_output(ancestor, personal, base);
        MergeResult {
            merged_content,
            has_conflicts: true,
            conflict_markers,
        }
    }

    /// Quick check: can these three versions be merged without conflicts?
    pub fn can_auto_merge(ancestor: &str, personal: &str, base: &str) -> bool {
        if personal == ancestor || base == ancestor || personal == base {
            return true;
        }
        let base_patch = diffy::create_patch(ancestor, base);
        if diffy::apply(personal, &base_patch).is_ok() {
            return true;
        }
        let personal_patch = diffy::create_patch(ancestor, personal);
        diffy::apply(base, &personal_patch).is_ok()
    }

    /// Whether content still carries unresolved conflict markers.
    ///
    /// Only the `<<<<<<<` and `>>>>>>>` fences are checked; a bare
    /// `=======` line is a legitimate setext heading underline in markdown.
    pub fn contains_markers(bytes: &[u8]) -> bool {
        let text = String::from_utf8_lossy(bytes);
        text.lines()
            .any(|l| l.starts_with("<<<<<<<") || l.starts_with(">>>>>>>"))
    }
}

fn clean(content: &str) -> MergeResult {
    MergeResult {
        merged_content: content.to_string(),
        has_conflicts: false,
        conflict_markers: Vec::new(),
    }
}

/// Binary sniff: a NUL byte within the first 8 KiB.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(8192)];
    head.contains(&0)
}

/// Generate conflict-marker output for a failed three-way merge.
///
/// Line-by-line comparison producing standard markers with the ancestor
/// section included (diff3 style).
fn conflict_marker_output(
    ancestor: &str,
    personal: &str,
    base: &str,
) -> (String, Vec<ConflictMarker>) {
    let ancestor_lines: Vec<&str> = ancestor.lines().collect();
    let personal_lines: Vec<&str> = personal.lines().collect();
    let base_lines: Vec<&str> = base.lines().collect();

    let mut output: Vec<String> = Vec::new();
    let mut markers = Vec::new();

    let max_len = personal_lines
        .len()
        .max(base_lines.len())
        .max(ancestor_lines.len());

    let mut i = 0;
    while i < max_len {
        let personal_line = personal_lines.get(i).copied();
        let base_line = base_lines.get(i).copied();

        match (personal_line, base_line) {
            (Some(p), Some(b)) if p == b => {
                output.push(p.to_string());
                i += 1;
            }
            (Some(p), Some(b)) => {
                let start_line = output.len() + 1;

                // Collect the contiguous differing region.
                let mut personal_block = vec![p.to_string()];
                let mut base_block = vec![b.to_string()];
                let mut j = i + 1;
                while j < max_len {
                    let pl = personal_lines.get(j).copied();
                    let bl = base_lines.get(j).copied();
                    if pl == bl {
                        break;
                    }
                    if let Some(p2) = pl {
                        personal_block.push(p2.to_string());
                    }
                    if let Some(b2) = bl {
                        base_block.push(b2.to_string());
                    }
                    j += 1;
                }

                output.push("<<<<<<< personal".to_string());
                output.extend(personal_block);
                output.push("||||||| ancestor".to_string());
                for k in i..j {
                    if let Some(a) = ancestor_lines.get(k) {
                        output.push(a.to_string());
                    }
                }
                output.push("=======".to_string());
                output.extend(base_block);
                output.push(">>>>>>> base".to_string());

                let end_line = output.len();
                markers.push(ConflictMarker {
                    start_line,
                    end_line,
                });

                i = j;
            }
            (Some(p), None) => {
                output.push(p.to_string());
                i += 1;
            }
            (None, Some(b)) => {
                output.push(b.to_string());
                i += 1;
            }
            (None, None) => {
                i += 1;
            }
        }
    }

    (output.join("\n"), markers)
}
