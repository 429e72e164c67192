use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, open_workspace};
use crate::imgfix::audit;
use crate::imgfix::lock::SessionLock;
use crate::imgfix::undo;

pub const DEFAULT_KEEP: usize = 5;

#[derive(Debug, Clone)]
pub struct PruneOptions {
    pub workspace: PathBuf,
    pub keep: usize,
}

pub fn run(opts: &PruneOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("prune");
    let (workspace, cfg) = open_workspace(&opts.workspace)?;
    let _lock = SessionLock::acquire(&workspace)?;
    let outcome = undo::prune_sessions(&workspace, &cfg.backup, opts.keep)?;

    report.detail(format!("kept={}", outcome.kept));
    report.detail(format!("removed={}", outcome.removed.len()));
    for dir in &outcome.removed {
        report.detail(format!("removed {dir}"));
    }
    if !outcome.removed.is_empty() {
        audit::record(
            &workspace,
            "prune",
            "ok",
            &format!("removed={} kept={}", outcome.removed.len(), outcome.kept),
        );
    }
    report.attach(&outcome)?;
    Ok(report)
}
