//! Shelfsync command-line tool.
//!
//! Provides subcommands for running sync sessions, inspecting pending
//! changes, viewing per-path diffs, managing backups, and generating /
//! validating configuration files.

mod report;
mod session;
mod style;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use shelfsync_core::config::{AppConfig, ApplyPolicy};
use shelfsync_core::conflict::{ConflictDetector, ResolutionPlan};
use shelfsync_core::engine::{SyncEngine, SyncResult, SyncStatus};
use shelfsync_core::{BackupId, Indexer, SyncSnapshot};
use shelfsync_core::index::FileSource;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Shelfsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "shelfsync",
    version,
    about = "Keep a personal knowledge library in step with its shared base tree"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync session.
    Sync {
        /// Apply policy for base-driven changes (defaults to the config).
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Resolve every conflict in favour of the personal tree.
        #[arg(long, conflicts_with = "use_remote")]
        keep_local: bool,

        /// Resolve every conflict in favour of the base tree.
        #[arg(long, conflicts_with = "keep_local")]
        use_remote: bool,

        /// Never prompt; leave conflicts pending instead.
        #[arg(long)]
        no_input: bool,

        /// Emit the result as JSON (implies --no-input).
        #[arg(long)]
        json: bool,
    },

    /// Show what a sync would do, without touching anything.
    Status {
        /// Emit the classification list as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the three-way diff for one path.
    Diff {
        /// Relative path within the library.
        path: String,
    },

    /// Restore the personal tree from a backup.
    Rollback {
        /// Backup ID as shown by `shelfsync backups list`.
        backup_id: String,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage personal tree backups.
    Backups {
        #[command(subcommand)]
        action: BackupsAction,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./shelfsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

#[derive(Subcommand, Debug)]
enum BackupsAction {
    /// List available backups, newest first.
    List,
    /// Apply the retention policy now.
    Prune,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    /// Apply base-driven changes automatically.
    Eager,
    /// Confirm every base-driven change.
    Confirm,
}

impl From<PolicyArg> for ApplyPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Eager => ApplyPolicy::Eager,
            PolicyArg::Confirm => ApplyPolicy::Confirm,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// Exit code for fatal errors (config, lock, I/O). Distinct from the
/// session outcome codes so scripting callers can tell "conflicts pending"
/// from "could not run at all".
const EXIT_FATAL: u8 = 3;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { output } => {
            init_logging("warn");
            cmd_init(&output)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => {
            init_logging("warn");
            cmd_validate(&config_path(cli.config.as_deref()))?;
            Ok(ExitCode::SUCCESS)
        }
        command => {
            let config = load_config(&config_path(cli.config.as_deref()))?;
            init_logging(&config.logging.level);

            match command {
                Commands::Sync {
                    policy,
                    keep_local,
                    use_remote,
                    no_input,
                    json,
                } => cmd_sync(&config, policy, keep_local, use_remote, no_input || json, json),
                Commands::Status { json } => cmd_status(&config, json).map(|()| ExitCode::SUCCESS),
                Commands::Diff { path } => cmd_diff(&config, &path).map(|()| ExitCode::SUCCESS),
                Commands::Rollback { backup_id, yes } => {
                    cmd_rollback(&config, &backup_id, yes).map(|()| ExitCode::SUCCESS)
                }
                Commands::Backups { action } => {
                    cmd_backups(&config, action).map(|()| ExitCode::SUCCESS)
                }
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn config_path(flag: Option<&std::path::Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    dirs::config_dir()
        .map(|d| d.join("shelfsync/config.toml"))
        .unwrap_or_else(|| PathBuf::from("shelfsync.toml"))
}

fn load_config(path: &std::path::Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).with_context(|| {
        format!(
            "failed to load configuration from {} (run `shelfsync init` to create one)",
            path.display()
        )
    })
}

fn build_engine(config: &AppConfig) -> Result<SyncEngine> {
    let ctx = config.context();
    ctx.ensure_state_dirs()
        .context("failed to create state directories")?;
    Ok(SyncEngine::new(ctx, &config.sync))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_sync(
    config: &AppConfig,
    policy: Option<PolicyArg>,
    keep_local: bool,
    use_remote: bool,
    no_input: bool,
    json: bool,
) -> Result<ExitCode> {
    let engine = build_engine(config)?;
    let policy: ApplyPolicy = policy.map(Into::into).unwrap_or(config.sync.apply_policy);

    let mut result = engine.sync(policy)?;

    if result.status == SyncStatus::ConflictsPending {
        let plan = if keep_local {
            Some(ResolutionPlan::keep_local_all(&result.conflicts))
        } else if use_remote {
            Some(ResolutionPlan::use_remote_all(&result.conflicts))
        } else if no_input {
            None
        } else {
            session::resolve_interactively(&engine, &result.conflicts)?
        };

        if let Some(plan) = plan {
            result = engine.sync_with_plan(policy, &plan)?;
        }
    }

    if result.status == SyncStatus::Committed && result.backup_id.is_some() {
        prune_after_commit(&engine, config, result.backup_id.as_deref());
    }

    if json {
        report::print_sync_result_json(&result)?;
    } else {
        report::print_sync_result(&result);
    }
    Ok(ExitCode::from(exit_code(&result)))
}

/// Retention runs after every committed session; the fresh backup is
/// always protected.
fn prune_after_commit(engine: &SyncEngine, config: &AppConfig, session_backup: Option<&str>) {
    let protect = session_backup.and_then(|id| BackupId::parse(id).ok());
    if let Err(e) = engine
        .backups()
        .prune(config.backup.keep_count, config.backup.keep_days, protect.as_ref())
    {
        eprintln!("{}", style::warn(&format!("backup pruning failed: {e}")));
    }
}

fn exit_code(result: &SyncResult) -> u8 {
    match result.status {
        SyncStatus::Committed => 0,
        SyncStatus::ConflictsPending => 1,
        SyncStatus::Aborted => 2,
    }
}

/// Read-only preview: scan, classify, report. Nothing is written, not even
/// the snapshot.
fn cmd_status(config: &AppConfig, json: bool) -> Result<()> {
    let ctx = config.context();
    let indexer = Indexer::new(config.sync.ignore.clone(), config.sync.hash_workers);
    let snapshot = SyncSnapshot::load_or_empty(&ctx.snapshot_path)?;

    let base = indexer.index(&ctx.base_root, FileSource::Base, Some(&snapshot))?;
    let personal = indexer.index(&ctx.personal_root, FileSource::Personal, Some(&snapshot))?;
    let report = ConflictDetector::detect(&base, &personal, &snapshot);

    let pending: Vec<_> = report
        .paths
        .iter()
        .filter(|cp| cp.classification.is_divergent())
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }

    println!();
    match snapshot.committed_at {
        Some(at) => println!(
            "{}",
            style::dim(&format!("last sync committed {}", at.to_rfc3339()))
        ),
        None => println!("{}", style::dim("no sync committed yet")),
    }
    report::print_status_table(&pending);

    for warning in base.warnings.iter().chain(personal.warnings.iter()) {
        println!("{}", style::warn(&warning.to_string()));
    }
    println!();
    Ok(())
}

fn cmd_diff(config: &AppConfig, path: &str) -> Result<()> {
    let engine = build_engine(config)?;
    let diff = engine.diff(path)?;

    if !diff.has_changes() {
        println!("{}", style::success(&format!("{path}: no changes")));
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("{} (ancestor -> {})", path, style::base_label()))
    );
    print!("{}", diff.base_patch);
    println!();
    println!(
        "{}",
        style::header(&format!(
            "{} (ancestor -> {})",
            path,
            style::personal_label()
        ))
    );
    print!("{}", diff.personal_patch);
    Ok(())
}

fn cmd_rollback(config: &AppConfig, backup_id: &str, yes: bool) -> Result<()> {
    let engine = build_engine(config)?;
    let id = BackupId::parse(backup_id)?;

    if !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Replace the personal tree wholesale with backup {id}?"
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::dim("rollback cancelled"));
            return Ok(());
        }
    }

    engine.rollback(&id)?;
    println!(
        "{}",
        style::success(&format!("Personal tree restored from backup {id}"))
    );
    Ok(())
}

fn cmd_backups(config: &AppConfig, action: BackupsAction) -> Result<()> {
    let engine = build_engine(config)?;
    match action {
        BackupsAction::List => {
            let ids = engine.backups().list()?;
            println!();
            report::print_backups_table(&ids);
            println!();
        }
        BackupsAction::Prune => {
            let pruned =
                engine
                    .backups()
                    .prune(config.backup.keep_count, config.backup.keep_days, None)?;
            if pruned.is_empty() {
                println!("{}", style::dim("Nothing to prune"));
            } else {
                for id in &pruned {
                    println!("{}", style::dim(&format!("pruned {id}")));
                }
                println!(
                    "{}",
                    style::success(&format!("Pruned {} backup(s)", pruned.len()))
                );
            }
        }
    }
    Ok(())
}

fn cmd_init(output: &PathBuf) -> Result<()> {
    let default_config = r#"# Shelfsync configuration

[library]
# Shared, externally updated base library (read-only to shelfsync).
base_root = "/srv/library/base"
# Your personal overlay of the library.
personal_root = "/home/you/library"
# Engine state (snapshot, lock, backups). Defaults to
# <personal_root>/.shelfsync when omitted.
# state_dir = "/home/you/.local/state/shelfsync"

[sync]
# "eager" applies base additions, advances, and removals automatically;
# "confirm" surfaces each one for explicit confirmation.
apply_policy = "eager"
# Glob patterns skipped during scanning (dotfiles and VCS metadata are
# always skipped).
ignore = ["*.tmp"]
# Locks older than this are treated as left behind by a crashed session.
stale_lock_secs = 3600
# Worker threads for content hashing.
hash_workers = 4

[backup]
# Keep at most this many backups...
keep_count = 10
# ...and none older than this many days.
keep_days = 30

[logging]
level = "info"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your library locations");
    println!(
        "  2. Validate with: shelfsync validate --config {}",
        output.display()
    );
    println!(
        "  3. Preview the first sync: shelfsync status --config {}",
        output.display()
    );
    println!(
        "  4. Run it: shelfsync sync --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &std::path::Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All required fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let ctx = config.context();
    println!();
    println!("Configuration summary:");
    println!("  Base root     : {}", ctx.base_root.display());
    println!("  Personal root : {}", ctx.personal_root.display());
    println!("  Snapshot      : {}", ctx.snapshot_path.display());
    println!("  Backups       : {}", ctx.backup_root.display());
    println!("  Apply policy  : {:?}", config.sync.apply_policy);
    println!("  Ignore globs  : {}", config.sync.ignore.join(", "));
    println!("  Hash workers  : {}", config.sync.hash_workers);
    println!(
        "  Retention     : {} backups / {} days",
        config.backup.keep_count, config.backup.keep_days
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: SyncStatus) -> SyncResult {
        SyncResult {
            status,
            conflicts: Vec::new(),
            resolved: Vec::new(),
            backup_id: None,
            warnings: Vec::new(),
            failure: None,
        }
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(exit_code(&result(SyncStatus::Committed)), 0);
        assert_eq!(exit_code(&result(SyncStatus::ConflictsPending)), 1);
        assert_eq!(exit_code(&result(SyncStatus::Aborted)), 2);
        // Fatal errors never collide with a session outcome.
        assert_ne!(EXIT_FATAL, exit_code(&result(SyncStatus::ConflictsPending)));
        assert_ne!(EXIT_FATAL, exit_code(&result(SyncStatus::Aborted)));
    }
}
