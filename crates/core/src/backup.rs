//! Full-tree backups of the personal library.
//!
//! Every mutating apply step is preceded by a backup. A backup is an
//! immutable, timestamp-identified full copy of the personal tree under
//! `backups/<timestamp>/`, mirroring the tree's relative layout. Both
//! creation and restore stage into a sibling directory first and finish
//! with a single rename, so a backup (or a restored tree) is either fully
//! present or absent.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::BackupError;

/// Identifier of one backup: its timestamped directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackupId(String);

impl BackupId {
    /// Parse an id, rejecting anything outside the timestamp alphabet so an
    /// id can never escape the backup root.
    pub fn parse(s: &str) -> Result<Self, BackupError> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '-') {
            return Err(BackupError::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The directory name form of the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Manages the backup directory for one personal tree.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_root: PathBuf,
    state_dir: PathBuf,
}

impl BackupManager {
    /// Create a manager rooted at `backup_root` (created lazily).
    ///
    /// The backup root always lives directly inside the engine state dir,
    /// and the state dir may itself sit inside the personal tree (the
    /// default layout). Backups must never capture it, and a restore must
    /// never destroy it.
    pub fn new(backup_root: PathBuf) -> Self {
        let state_dir = backup_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| backup_root.clone());
        Self {
            backup_root,
            state_dir,
        }
    }

    /// Absolute directory of one backup.
    pub fn path_of(&self, id: &BackupId) -> PathBuf {
        self.backup_root.join(id.as_str())
    }

    /// Copy the entire personal tree into a new timestamped backup.
    ///
    /// The copy lands in a `.staging-` directory first and is renamed into
    /// place only once complete.
    pub fn create_backup(&self, personal_root: &Path) -> Result<BackupId, BackupError> {
        std::fs::create_dir_all(&self.backup_root)?;

        let id = self.fresh_id();
        let staging = self.backup_root.join(format!(".staging-{}", id.as_str()));
        let target = self.path_of(&id);

        info!(id = %id, root = %personal_root.display(), "creating backup");
        copy_tree(personal_root, &staging, Some(&self.state_dir))?;
        std::fs::rename(&staging, &target)?;

        debug!(id = %id, "backup complete");
        Ok(id)
    }

    /// Replace the live personal tree wholesale with the given backup.
    ///
    /// The backup is first copied to a staging directory next to the
    /// personal root; the old tree is then renamed aside, the staging copy
    /// renamed in, and the old tree removed best-effort.
    pub fn restore(&self, id: &BackupId, personal_root: &Path) -> Result<(), BackupError> {
        let source = self.path_of(id);
        if !source.is_dir() {
            return Err(BackupError::NotFound(id.to_string()));
        }

        info!(id = %id, root = %personal_root.display(), "restoring backup");

        let parent = personal_root
            .parent()
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;
        let staging = parent.join(format!(".shelfsync-restore-{}", id.as_str()));
        let discard = parent.join(format!(".shelfsync-discard-{}", id.as_str()));

        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        copy_tree(&source, &staging, None)?;

        std::fs::rename(personal_root, &discard)?;
        std::fs::rename(&staging, personal_root)?;

        // When the state dir lives inside the personal tree, carry it over
        // to the restored tree before the old one is discarded. The
        // backups, snapshot, and held lock file all survive the swap.
        if let Ok(rel) = self.state_dir.strip_prefix(personal_root) {
            let old_state = discard.join(rel);
            if old_state.is_dir() {
                let new_state = personal_root.join(rel);
                if let Some(parent) = new_state.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::rename(&old_state, &new_state)?;
            }
        }

        // The swap is done; removal of the old tree is best-effort.
        if let Err(e) = std::fs::remove_dir_all(&discard) {
            warn!(path = %discard.display(), error = %e, "could not remove replaced tree");
        }

        info!(id = %id, "restore complete");
        Ok(())
    }

    /// All backup ids, newest first.
    pub fn list(&self) -> Result<Vec<BackupId>, BackupError> {
        if !self.backup_root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.backup_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // Staging leftovers from interrupted backups are not backups.
            if let Ok(id) = BackupId::parse(&name) {
                ids.push(id);
            }
        }
        ids.sort();
        ids.reverse();
        Ok(ids)
    }

    /// Delete one backup.
    pub fn delete(&self, id: &BackupId) -> Result<(), BackupError> {
        let path = self.path_of(id);
        if !path.is_dir() {
            return Err(BackupError::NotFound(id.to_string()));
        }
        std::fs::remove_dir_all(path)?;
        Ok(())
    }

    /// Apply the retention policy: keep at most `keep_count` backups and
    /// none older than `keep_days`. A protected id (the in-flight session's
    /// backup) is never pruned. Returns the pruned ids.
    pub fn prune(
        &self,
        keep_count: usize,
        keep_days: u32,
        protect: Option<&BackupId>,
    ) -> Result<Vec<BackupId>, BackupError> {
        let ids = self.list()?;
        let cutoff = Utc::now() - Duration::days(i64::from(keep_days));

        let mut pruned = Vec::new();
        for (rank, id) in ids.iter().enumerate() {
            if Some(id) == protect {
                continue;
            }
            let too_many = rank >= keep_count;
            let too_old = id_timestamp(id).map(|t| t < cutoff).unwrap_or(false);
            if too_many || too_old {
                self.delete(id)?;
                pruned.push(id.clone());
            }
        }

        if !pruned.is_empty() {
            info!(count = pruned.len(), "pruned backups");
        }
        Ok(pruned)
    }

    /// A timestamp id not yet present in the backup root.
    fn fresh_id(&self) -> BackupId {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S%3f").to_string();
        let mut candidate = stamp.clone();
        let mut n = 0;
        while self.backup_root.join(&candidate).exists() {
            n += 1;
            candidate = format!("{stamp}-{n}");
        }
        BackupId(candidate)
    }
}

/// Parse the creation time back out of a backup id.
fn id_timestamp(id: &BackupId) -> Option<DateTime<Utc>> {
    let head: String = id.as_str().chars().take(18).collect();
    chrono::NaiveDateTime::parse_from_str(&head, "%Y%m%d-%H%M%S%3f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Recursively copy every regular file under `src` into `dst`, preserving
/// the relative layout. The `exclude` directory (the engine state dir,
/// which may sit inside `src`) is pruned from the walk, and symlink cycles
/// are skipped with a warning, matching the scanner's containment.
fn copy_tree(src: &Path, dst: &Path, exclude: Option<&Path>) -> Result<(), BackupError> {
    std::fs::create_dir_all(dst)?;
    let walker = WalkDir::new(src)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| exclude.map_or(true, |ex| e.path() != ex));
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.loop_ancestor().is_some() => {
                warn!(path = ?e.path(), "symlink cycle, skipping subtree");
                continue;
            }
            Err(e) => {
                return Err(BackupError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk error")
                })))
            }
        };
        let rel = match entry.path().strip_prefix(src) {
            Ok(r) if !r.as_os_str().is_empty() => r,
            _ => continue,
        };
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn tree_contents(root: &Path) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned();
                out.push((rel, fs::read(entry.path()).unwrap()));
            }
        }
        out
    }

    fn setup() -> (tempfile::TempDir, PathBuf, BackupManager) {
        let dir = tempfile::tempdir().unwrap();
        let personal = dir.path().join("personal");
        fs::create_dir_all(&personal).unwrap();
        let mgr = BackupManager::new(dir.path().join("backups"));
        (dir, personal, mgr)
    }

    #[test]
    fn test_backup_restore_round_trip() {
        let (_dir, personal, mgr) = setup();
        write(&personal, "a.md", "alpha");
        write(&personal, "notes/b.md", "beta");

        let before = tree_contents(&personal);
        let id = mgr.create_backup(&personal).unwrap();

        // Mutate the live tree, then restore.
        write(&personal, "a.md", "mutated");
        fs::remove_file(personal.join("notes/b.md")).unwrap();
        write(&personal, "extra.md", "extra");

        mgr.restore(&id, &personal).unwrap();
        assert_eq!(tree_contents(&personal), before);
    }

    #[test]
    fn test_backup_mirrors_relative_layout() {
        let (_dir, personal, mgr) = setup();
        write(&personal, "deep/nested/c.md", "gamma");

        let id = mgr.create_backup(&personal).unwrap();
        let copied = mgr.path_of(&id).join("deep/nested/c.md");
        assert_eq!(fs::read_to_string(copied).unwrap(), "gamma");
    }

    #[test]
    fn test_no_staging_leftovers() {
        let (_dir, personal, mgr) = setup();
        write(&personal, "a.md", "alpha");
        mgr.create_backup(&personal).unwrap();

        let names: Vec<String> = fs::read_dir(mgr.backup_root.clone())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(".staging-")));
    }

    #[test]
    fn test_list_newest_first() {
        let (_dir, personal, mgr) = setup();
        write(&personal, "a.md", "alpha");

        let first = mgr.create_backup(&personal).unwrap();
        let second = mgr.create_backup(&personal).unwrap();

        let ids = mgr.list().unwrap();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn test_restore_unknown_id() {
        let (_dir, personal, mgr) = setup();
        let id = BackupId::parse("20250101-000000000").unwrap();
        let result = mgr.restore(&id, &personal);
        assert!(matches!(result, Err(BackupError::NotFound(_))));
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!(BackupId::parse("../escape").is_err());
        assert!(BackupId::parse("").is_err());
        assert!(BackupId::parse("20250101-000000000").is_ok());
        assert!(BackupId::parse("20250101-000000000-1").is_ok());
    }

    #[test]
    fn test_prune_by_count_protects_session_backup() {
        let (_dir, personal, mgr) = setup();
        write(&personal, "a.md", "alpha");

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(mgr.create_backup(&personal).unwrap());
        }
        let oldest = ids[0].clone();

        let pruned = mgr.prune(2, 365, Some(&oldest)).unwrap();
        let remaining = mgr.list().unwrap();

        // The protected oldest backup survives even beyond the count limit.
        assert!(remaining.contains(&oldest));
        assert!(remaining.len() <= 3);
        assert!(!pruned.contains(&oldest));
    }

    #[test]
    fn test_state_dir_inside_personal_tree_not_captured() {
        // Default layout: the state dir (and thus the backup root) lives
        // inside the tree being backed up.
        let dir = tempfile::tempdir().unwrap();
        let personal = dir.path().join("personal");
        fs::create_dir_all(&personal).unwrap();
        let mgr = BackupManager::new(personal.join(".shelfsync/backups"));

        write(&personal, "a.md", "alpha");
        write(&personal, ".shelfsync/snapshot.json", "{}");

        let id = mgr.create_backup(&personal).unwrap();
        assert!(mgr.path_of(&id).join("a.md").is_file());
        // The engine state never ends up inside a backup.
        assert!(!mgr.path_of(&id).join(".shelfsync").exists());
    }

    #[test]
    fn test_restore_preserves_state_dir_and_backups() {
        let dir = tempfile::tempdir().unwrap();
        let personal = dir.path().join("personal");
        fs::create_dir_all(&personal).unwrap();
        let mgr = BackupManager::new(personal.join(".shelfsync/backups"));

        write(&personal, "a.md", "alpha");
        write(&personal, ".shelfsync/snapshot.json", "{}");
        let id = mgr.create_backup(&personal).unwrap();

        write(&personal, "a.md", "mutated");
        mgr.restore(&id, &personal).unwrap();

        assert_eq!(fs::read_to_string(personal.join("a.md")).unwrap(), "alpha");
        // The restore did not eat the state dir or the backup just used.
        assert_eq!(
            fs::read_to_string(personal.join(".shelfsync/snapshot.json")).unwrap(),
            "{}"
        );
        assert!(mgr.path_of(&id).is_dir());
        assert!(mgr.list().unwrap().contains(&id));
    }

    #[cfg(unix)]
    #[test]
    fn test_backup_tolerates_symlink_cycle() {
        let (_dir, personal, mgr) = setup();
        write(&personal, "a.md", "alpha");
        let loop_dir = personal.join("loop");
        fs::create_dir(&loop_dir).unwrap();
        std::os::unix::fs::symlink(&loop_dir, loop_dir.join("self")).unwrap();

        let id = mgr.create_backup(&personal).unwrap();
        assert!(mgr.path_of(&id).join("a.md").is_file());
    }
}
