use crate::imgfix::paths::WorkspacePaths;
use crate::imgfix::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(paths: &WorkspacePaths, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&paths.backup_base)
        .with_context(|| format!("failed to create {}", paths.backup_base.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.audit_log)
        .with_context(|| format!("failed to open {}", paths.audit_log.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Audit logging must never fail the operation it describes.
pub fn record(paths: &WorkspacePaths, phase: &str, status: &str, message: &str) {
    if let Err(err) = append_event(paths, phase, status, message) {
        tracing::warn!(phase, status, error = %format!("{err:#}"), "audit append failed");
    }
}

pub fn read_events(paths: &WorkspacePaths) -> Result<Vec<AuditEvent>> {
    if !paths.audit_log.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(&paths.audit_log)
        .with_context(|| format!("failed to read {}", paths.audit_log.display()))?;
    let mut out = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: AuditEvent = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse audit line in {}", paths.audit_log.display())
        })?;
        out.push(event);
    }
    Ok(out)
}
