use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, open_workspace};
use crate::imgfix::{audit, undo};

#[derive(Debug, Clone)]
pub struct SessionsOptions {
    pub workspace: PathBuf,
}

pub fn run(opts: &SessionsOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("sessions");
    let (workspace, cfg) = open_workspace(&opts.workspace)?;
    let sessions = undo::list_sessions(&workspace, &cfg.backup)?;

    report.detail(format!("sessions={}", sessions.len()));
    for session in &sessions {
        if !session.journal_ok {
            report.detail(format!("session={} journal=missing", session.name));
            continue;
        }
        report.detail(format!(
            "session={} documents={} fixes={} cancelled={} undone={}",
            session.name, session.documents, session.fixes, session.cancelled, session.undone
        ));
    }
    let events = audit::read_events(&workspace)?;
    if let Some(last) = events.last() {
        report.detail(format!(
            "last_audit={} {} {}",
            last.phase, last.status, last.message
        ));
    }
    report.attach(&sessions)?;
    Ok(report)
}
