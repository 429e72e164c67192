use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, open_workspace};
use crate::imgfix::manifest::RepairManifest;
use crate::imgfix::scan;

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub workspace: PathBuf,
    pub manifest: PathBuf,
}

pub fn run(opts: &VerifyOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("verify");
    let (workspace, _cfg) = open_workspace(&opts.workspace)?;
    let manifest = RepairManifest::load(&opts.manifest)?;

    let mut remaining = 0usize;
    for doc in manifest.documents(&workspace) {
        match scan::dangling_in_document(&doc.document_abs) {
            Ok(dangling) if dangling.is_empty() => {}
            Ok(dangling) => {
                remaining += dangling.len();
                for reference in dangling {
                    report.issue(format!("{}: {reference}", doc.document_rel));
                }
            }
            Err(err) => report.issue(format!("{}: {err:#}", doc.document_rel)),
        }
    }
    report.detail(format!("documents={}", manifest.dangling.len()));
    report.detail(format!("actual_remaining={remaining}"));
    Ok(report)
}
