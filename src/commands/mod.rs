pub mod prune;
pub mod repair;
pub mod sessions;
pub mod undo;
pub mod verify;

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::imgfix::config::{FixerConfig, load_config};
use crate::imgfix::paths::{WorkspacePaths, resolve_workspace};

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
            data: None,
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn attach<T: Serialize>(&mut self, data: &T) -> Result<()> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(())
    }
}

/// Config first: it decides where the backup directory lives.
pub fn open_workspace(root: &Path) -> Result<(WorkspacePaths, FixerConfig)> {
    let cfg = load_config(root)?;
    let paths = resolve_workspace(root, &cfg.backup)?;
    Ok((paths, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_flips_ok_and_data_is_optional_in_json() {
        let mut report = CommandReport::new("verify");
        report.detail("actual_remaining=0");
        assert!(report.ok);
        let json = serde_json::to_string(&report).expect("json");
        assert!(!json.contains("\"data\""));

        report.issue("a.md: 1 dangling reference(s)");
        report.attach(&vec![1, 2]).expect("attach");
        assert!(!report.ok);
        let json = serde_json::to_string(&report).expect("json");
        assert!(json.contains("\"data\":[1,2]"));
    }
}
