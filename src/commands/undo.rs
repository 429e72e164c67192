use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, open_workspace};
use crate::imgfix::audit;
use crate::imgfix::lock::SessionLock;
use crate::imgfix::undo::{self, RestoreStatus};

#[derive(Debug, Clone)]
pub struct UndoOptions {
    pub workspace: PathBuf,
    pub backup_dir: Option<PathBuf>,
}

pub fn run(opts: &UndoOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("undo");
    let (workspace, cfg) = open_workspace(&opts.workspace)?;
    let _lock = SessionLock::acquire(&workspace)?;

    let outcome = match opts.backup_dir.as_deref() {
        Some(dir) => undo::undo_session(dir, &cfg.backup, Some(&workspace.root_normalized))?,
        None => undo::undo_latest(&workspace, &cfg.backup)?,
    };

    if let Some(dir) = &outcome.backup_dir {
        report.detail(format!("backup_dir={dir}"));
    }
    report.detail(format!("restored={}", outcome.restored));
    report.detail(format!("failed={}", outcome.failed));
    for entry in &outcome.entries {
        match entry.status {
            RestoreStatus::Restored => report.detail(format!("restored {}", entry.file)),
            RestoreStatus::Skipped => report.detail(format!("skipped {}", entry.file)),
            _ => report.issue(format!(
                "{}: {}",
                entry.file,
                entry.message.as_deref().unwrap_or("restore failed")
            )),
        }
    }
    if outcome.restored == 0 {
        report.issue(
            outcome
                .note
                .clone()
                .unwrap_or_else(|| "nothing was restored".to_string()),
        );
    }

    audit::record(
        &workspace,
        "undo",
        if report.ok { "ok" } else { "issues" },
        &format!(
            "restored={} failed={} backup_dir={}",
            outcome.restored,
            outcome.failed,
            outcome.backup_dir.as_deref().unwrap_or("-")
        ),
    );
    report.attach(&outcome)?;
    Ok(report)
}
