//! TOML-based configuration for Shelfsync.
//!
//! Configuration is split into a serialized [`AppConfig`] and a resolved
//! [`SyncContext`]. The context bundles every path the engine touches
//! (base root, personal root, backup root, lock and snapshot files) and is
//! constructed once, then passed explicitly to each component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Library tree locations.
    pub library: LibraryConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Backup retention settings.
    #[serde(default)]
    pub backup: BackupConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Library trees
// ---------------------------------------------------------------------------

/// Locations of the two library trees and the engine state directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root of the shared, externally updated base library (read-only).
    pub base_root: PathBuf,

    /// Root of the user-owned personal overlay.
    pub personal_root: PathBuf,

    /// Directory for engine state: snapshot, lock file, and backups.
    /// Defaults to `<personal_root>/.shelfsync`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Policy for applying non-conflicting base-driven changes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApplyPolicy {
    /// Apply base advances, adoptions, and removals automatically.
    #[default]
    Eager,
    /// Surface every base-driven change for explicit confirmation.
    Confirm,
}

/// Sync behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Default policy for non-conflicting auto-resolutions.
    #[serde(default)]
    pub apply_policy: ApplyPolicy,

    /// Glob patterns (matched against forward-slash relative paths) to
    /// exclude from scanning, in addition to dotfiles and VCS metadata.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Age in seconds after which a lock file is considered stale.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,

    /// Number of worker threads for content hashing during scans.
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,
}

fn default_stale_lock_secs() -> u64 {
    3600
}
fn default_hash_workers() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            apply_policy: ApplyPolicy::default(),
            ignore: Vec::new(),
            stale_lock_secs: default_stale_lock_secs(),
            hash_workers: default_hash_workers(),
        }
    }
}

// ---------------------------------------------------------------------------
// Backup retention
// ---------------------------------------------------------------------------

/// Backup retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Maximum number of backups to keep (default 10).
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,

    /// Maximum age of a backup in days (default 30).
    #[serde(default = "default_keep_days")]
    pub keep_days: u32,
}

fn default_keep_count() -> usize {
    10
}
fn default_keep_days() -> u32 {
    30
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            keep_count: default_keep_count(),
            keep_days: default_keep_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.library.base_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "library.base_root".into(),
                detail: "base root must not be empty".into(),
            });
        }
        if self.library.personal_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "library.personal_root".into(),
                detail: "personal root must not be empty".into(),
            });
        }
        if self.library.base_root == self.library.personal_root {
            return Err(ConfigError::InvalidValue {
                field: "library.personal_root".into(),
                detail: "personal root must differ from base root".into(),
            });
        }
        if self.sync.hash_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.hash_workers".into(),
                detail: "hash worker count must be > 0".into(),
            });
        }
        if self.sync.stale_lock_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.stale_lock_secs".into(),
                detail: "stale lock threshold must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the resolved path context for this configuration.
    pub fn context(&self) -> SyncContext {
        let state_dir = self
            .library
            .state_dir
            .clone()
            .unwrap_or_else(|| self.library.personal_root.join(".shelfsync"));
        SyncContext::new(
            self.library.base_root.clone(),
            self.library.personal_root.clone(),
            state_dir,
        )
    }
}

// ---------------------------------------------------------------------------
// Resolved path context
// ---------------------------------------------------------------------------

/// Every filesystem location the engine touches, resolved once.
///
/// Passed explicitly to each component; the engine never consults process
/// globals for paths.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Root of the base library tree.
    pub base_root: PathBuf,

    /// Root of the personal overlay tree.
    pub personal_root: PathBuf,

    /// Directory holding timestamped backups of the personal tree.
    pub backup_root: PathBuf,

    /// Lock file guarding the personal tree against concurrent sessions.
    pub lock_path: PathBuf,

    /// Snapshot file recording the last committed sync state.
    pub snapshot_path: PathBuf,
}

impl SyncContext {
    /// Build a context from the two tree roots and a state directory.
    pub fn new(base_root: PathBuf, personal_root: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            base_root,
            personal_root,
            backup_root: state_dir.join("backups"),
            lock_path: state_dir.join("sync.lock"),
            snapshot_path: state_dir.join("snapshot.json"),
        }
    }

    /// Create the state directories if they do not exist yet.
    pub fn ensure_state_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.backup_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[library]
base_root = "/srv/library/base"
personal_root = "/home/user/library"
state_dir = "/home/user/.local/state/shelfsync"

[sync]
apply_policy = "confirm"
ignore = ["drafts/**", "*.tmp"]
stale_lock_secs = 1800
hash_workers = 8

[backup]
keep_count = 5
keep_days = 14

[logging]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.library.base_root, PathBuf::from("/srv/library/base"));
        assert_eq!(config.sync.apply_policy, ApplyPolicy::Confirm);
        assert_eq!(config.sync.ignore, vec!["drafts/**", "*.tmp"]);
        assert_eq!(config.backup.keep_count, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[library]
base_root = "/srv/library/base"
personal_root = "/home/user/library"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.sync.apply_policy, ApplyPolicy::Eager);
        assert_eq!(config.sync.stale_lock_secs, 3600);
        assert_eq!(config.sync.hash_workers, 4);
        assert_eq!(config.backup.keep_count, 10);
        assert_eq!(config.backup.keep_days, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shelfsync.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.sync.hash_workers, 8);
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/shelfsync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_same_roots() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.library.personal_root = config.library.base_root.clone();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "library.personal_root"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.sync.hash_workers = 0;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sync.hash_workers"
        ));
    }

    #[test]
    fn test_context_defaults_to_personal_dotdir() {
        let minimal = r#"
[library]
base_root = "/srv/library/base"
personal_root = "/home/user/library"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        let ctx = config.context();
        assert_eq!(
            ctx.snapshot_path,
            PathBuf::from("/home/user/library/.shelfsync/snapshot.json")
        );
        assert_eq!(
            ctx.backup_root,
            PathBuf::from("/home/user/library/.shelfsync/backups")
        );
    }
}
