use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::thread;

use crate::commands::{CommandReport, open_workspace};
use crate::imgfix::manifest::RepairManifest;
use crate::imgfix::paths;
use crate::imgfix::session::{CancelToken, SessionOptions, run_session};

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub workspace: PathBuf,
    pub manifest: PathBuf,
    pub dry_run: bool,
    pub verify: bool,
}

pub fn run(opts: &RepairOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("repair");
    let (workspace, cfg) = open_workspace(&opts.workspace)?;
    let manifest = RepairManifest::load(&opts.manifest)?;

    if let Some(root) = manifest.workspace_root.as_deref()
        && paths::normalize(root) != workspace.root_normalized
    {
        tracing::warn!(
            manifest_root = root,
            workspace = %workspace.root_normalized,
            "manifest was produced for a different workspace root; relative documents resolve against --workspace"
        );
    }

    let session_opts = SessionOptions {
        dry_run: opts.dry_run,
        verify: opts.verify,
    };
    let cancel = CancelToken::new();
    // Matching and file I/O run off the caller's thread.
    let worker = thread::Builder::new()
        .name("mdimg-repair".to_string())
        .spawn(move || run_session(&workspace, &cfg, &manifest, &session_opts, &cancel))
        .context("failed to spawn repair worker")?;
    let session = worker
        .join()
        .map_err(|_| anyhow!("repair worker panicked"))??;

    for line in session.detail_lines() {
        report.detail(line);
    }
    for error in &session.errors {
        report.issue(error.clone());
    }
    if session.cancelled {
        report.issue("session cancelled before all documents were processed");
    }
    report.attach(&session)?;
    Ok(report)
}
