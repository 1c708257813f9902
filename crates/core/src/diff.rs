//! Textual three-way diffs for conflict inspection.
//!
//! Interactive resolution callers need to see what each side changed
//! relative to the common ancestor before choosing an outcome. The
//! [`ThreeWayDiff`] bundles the three text versions of one path with a
//! unified patch for each side.

use diffy::create_patch;

/// Three-way view of one path with per-side unified patches.
#[derive(Debug, Clone)]
pub struct ThreeWayDiff {
    /// Normalized relative path.
    pub path: String,
    /// Ancestor content, if it is known and textual.
    pub ancestor: Option<String>,
    /// Base tree content, if present and textual.
    pub base: Option<String>,
    /// Personal tree content, if present and textual.
    pub personal: Option<String>,
    /// Unified patch ancestor -> base.
    pub base_patch: String,
    /// Unified patch ancestor -> personal.
    pub personal_patch: String,
}

impl ThreeWayDiff {
    /// Build the diff from whichever versions of the path exist. Missing
    /// versions diff against empty content.
    pub fn build(
        path: &str,
        ancestor: Option<String>,
        base: Option<String>,
        personal: Option<String>,
    ) -> Self {
        let anc = ancestor.as_deref().unwrap_or("");
        let base_patch = create_patch(anc, base.as_deref().unwrap_or("")).to_string();
        let personal_patch = create_patch(anc, personal.as_deref().unwrap_or("")).to_string();

        Self {
            path: path.to_string(),
            ancestor,
            base,
            personal,
            base_patch,
            personal_patch,
        }
    }

    /// Whether either side differs from the ancestor.
    pub fn has_changes(&self) -> bool {
        !is_empty_patch(&self.base_patch) || !is_empty_patch(&self.personal_patch)
    }
}

/// Short personal-vs-base preview attached to conflict reports, truncated
/// to `max_lines` patch lines.
pub fn conflict_preview(personal: Option<&str>, base: Option<&str>, max_lines: usize) -> String {
    let patch = create_patch(personal.unwrap_or(""), base.unwrap_or("")).to_string();
    let mut lines: Vec<&str> = patch.lines().collect();
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        let mut out = lines.join("\n");
        out.push_str("\n... (truncated)");
        return out;
    }
    patch
}

/// A diffy patch with no hunks is a header-only patch.
fn is_empty_patch(patch: &str) -> bool {
    !patch.lines().any(|l| l.starts_with("@@"))
}
