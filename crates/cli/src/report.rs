//! Human-readable and JSON output for sync results and status views.

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use shelfsync_core::conflict::detector::{ClassifiedPath, ConflictRecord};
use shelfsync_core::engine::{SyncResult, SyncStatus};
use shelfsync_core::BackupId;

use crate::style;

/// Print one finished sync session.
pub fn print_sync_result(result: &SyncResult) {
    println!();
    match result.status {
        SyncStatus::Committed => {
            if result.resolved.is_empty() {
                println!("{}", style::success("Already in sync, nothing to do"));
            } else {
                println!(
                    "{}",
                    style::success(&format!(
                        "Sync committed ({} change(s) applied)",
                        result.resolved.len()
                    ))
                );
                print_resolved_table(result);
            }
            if let Some(id) = &result.backup_id {
                println!("{}", style::dim(&format!("backup: {id}")));
            }
        }
        SyncStatus::ConflictsPending => {
            println!(
                "{}",
                style::warn(&format!(
                    "{} conflict(s) need resolution",
                    result.conflicts.len()
                ))
            );
            print_conflicts_table(&result.conflicts);
        }
        SyncStatus::Aborted => {
            println!("{}", style::error("Sync aborted, personal tree restored"));
            if let Some(failure) = &result.failure {
                println!("  {failure}");
            }
            if let Some(id) = &result.backup_id {
                println!("{}", style::dim(&format!("backup kept: {id}")));
            }
        }
    }

    for warning in &result.warnings {
        println!("{}", style::warn(warning));
    }
    println!();
}

/// Print the result as pretty JSON for scripting callers.
pub fn print_sync_result_json(result: &SyncResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

fn print_resolved_table(result: &SyncResult) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Path", "Action"]);
    for change in &result.resolved {
        table.add_row(vec![
            Cell::new(&change.path),
            Cell::new(change.action.to_string()),
        ]);
    }
    println!("{table}");
}

/// Table of pending conflicts.
pub fn print_conflicts_table(conflicts: &[ConflictRecord]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Path", "Classification", "Content"]);
    for c in conflicts {
        let content = if c.is_binary { "binary" } else { "text" };
        table.add_row(vec![
            Cell::new(&c.path),
            Cell::new(c.classification.to_string()),
            Cell::new(content),
        ]);
    }
    println!("{table}");
}

/// Table of every path that would change, for `shelfsync status`.
pub fn print_status_table(pending: &[&ClassifiedPath]) {
    if pending.is_empty() {
        println!("{}", style::success("Trees are in sync"));
        return;
    }

    println!(
        "{}",
        style::header(&format!("{} path(s) differ", pending.len()))
    );
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Path", "Classification", "Conflict"]);
    for cp in pending {
        let conflict = if cp.classification.is_conflict() {
            style::warn("yes")
        } else {
            style::dim("no")
        };
        table.add_row(vec![
            Cell::new(&cp.path),
            Cell::new(cp.classification.to_string()),
            Cell::new(conflict),
        ]);
    }
    println!("{table}");
}

/// Table of available backups, newest first.
pub fn print_backups_table(ids: &[BackupId]) {
    if ids.is_empty() {
        println!("{}", style::dim("No backups"));
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Backup ID", ""]);
    for (i, id) in ids.iter().enumerate() {
        let note = if i == 0 { "newest" } else { "" };
        table.add_row(vec![Cell::new(id.to_string()), Cell::new(note)]);
    }
    println!("{table}");
}
