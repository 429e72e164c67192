use crate::error::{ErrorCode, FixerError};
use crate::imgfix::config::BackupConfig;
use crate::imgfix::journal::{self, UndoPlan};
use crate::imgfix::paths::{self, WorkspacePaths};
use crate::imgfix::util::{self, sha256_hex};
use crate::imgfix::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const UNDONE_MARKER_FILE: &str = "undone.json";

/// Minimal journal view. Undo reads only these fields so journals written
/// by older or newer builds stay restorable.
#[derive(Debug, Deserialize)]
struct UndoView {
    #[serde(default)]
    workspace_root: Option<String>,
    #[serde(default)]
    modifications: Vec<UndoEntry>,
}

#[derive(Debug, Deserialize)]
struct UndoEntry {
    file: String,
    #[serde(default)]
    backup_file: Option<String>,
    #[serde(default)]
    backup_sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Restored,
    Skipped,
    SnapshotMissing,
    SnapshotCorrupt,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub file: String,
    pub status: RestoreStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UndoOutcome {
    pub backup_dir: Option<String>,
    pub restored: usize,
    pub failed: usize,
    pub entries: Vec<RestoreOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl UndoOutcome {
    fn noted(backup_dir: Option<&Path>, note: impl Into<String>) -> Self {
        Self {
            backup_dir: backup_dir.map(paths::path_to_string),
            note: Some(note.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UndoneMarker {
    undone_at_epoch_secs: u64,
    restored: usize,
    failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub backup_dir: String,
    pub timestamp: Option<String>,
    pub documents: usize,
    pub fixes: usize,
    pub cancelled: bool,
    pub undone: bool,
    pub journal_ok: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneOutcome {
    pub kept: usize,
    pub removed: Vec<String>,
}

fn load_view(journal_path: &Path) -> Result<UndoView> {
    let raw = fs::read_to_string(journal_path)
        .with_context(|| format!("failed to read {}", journal_path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", journal_path.display()))
}

fn locate_snapshot(recorded: &str, backup_dir: &Path) -> Option<PathBuf> {
    let direct = PathBuf::from(recorded);
    if direct.is_file() {
        return Some(direct);
    }
    // The backup directory may have moved since the journal was written.
    let name = paths::file_name(recorded);
    if name.is_empty() {
        return None;
    }
    let relocated = backup_dir.join(name);
    relocated.is_file().then_some(relocated)
}

fn restore_entry(entry: &UndoEntry, backup_dir: &Path, workspace_root: &str) -> RestoreOutcome {
    let outcome = |status, message: Option<String>| RestoreOutcome {
        file: entry.file.clone(),
        status,
        message,
    };

    let Some(recorded) = entry.backup_file.as_deref().filter(|s| !s.trim().is_empty()) else {
        return outcome(RestoreStatus::Skipped, Some("no snapshot recorded".to_string()));
    };
    let Some(snapshot) = locate_snapshot(recorded, backup_dir) else {
        warn::emit(WarnEvent {
            code: ErrorCode::E007SnapshotMissing,
            stage: "undo",
            action: "restore",
            document: &entry.file,
            reference: "",
            reason: "snapshot file not found",
            err: recorded,
        });
        return outcome(
            RestoreStatus::SnapshotMissing,
            Some(format!("snapshot not found: {recorded}")),
        );
    };

    let bytes = match fs::read(&snapshot) {
        Ok(bytes) => bytes,
        Err(err) => {
            return outcome(
                RestoreStatus::Failed,
                Some(format!("failed to read {}: {err}", snapshot.display())),
            );
        }
    };
    if let Some(expected) = entry.backup_sha256.as_deref() {
        let actual = sha256_hex(&bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            warn::emit(WarnEvent {
                code: ErrorCode::E008SnapshotCorrupt,
                stage: "undo",
                action: "restore",
                document: &entry.file,
                reference: "",
                reason: "snapshot checksum mismatch",
                err: &actual,
            });
            return outcome(
                RestoreStatus::SnapshotCorrupt,
                Some(format!("checksum mismatch for {}", snapshot.display())),
            );
        }
    }

    let target = paths::join(workspace_root, &entry.file);
    match util::write_atomic(Path::new(&target), &bytes) {
        Ok(()) => {
            tracing::debug!(document = %entry.file, target = %target, "document restored");
            outcome(RestoreStatus::Restored, None)
        }
        Err(err) => {
            let message = format!("{err:#}");
            warn::emit(WarnEvent {
                code: ErrorCode::E004DocumentIo,
                stage: "undo",
                action: "restore",
                document: &entry.file,
                reference: "",
                reason: "document write failed",
                err: &message,
            });
            outcome(RestoreStatus::Failed, Some(message))
        }
    }
}

fn workspace_root_for(
    view: &UndoView,
    backup_dir: &Path,
    backup: &BackupConfig,
    workspace_override: Option<&str>,
) -> Option<String> {
    if let Some(root) = view.workspace_root.as_deref().filter(|s| !s.trim().is_empty()) {
        return Some(paths::normalize(root));
    }
    let plan_path = backup_dir.join(&backup.undo_plan_file);
    if let Ok(UndoPlan { workspace_root, .. }) = journal::load_undo_plan(&plan_path)
        && !workspace_root.trim().is_empty()
    {
        return Some(paths::normalize(&workspace_root));
    }
    workspace_override.map(paths::normalize)
}

fn write_undone_marker(backup_dir: &Path, outcome: &UndoOutcome) -> Result<()> {
    let marker = UndoneMarker {
        undone_at_epoch_secs: util::now_epoch_secs()?,
        restored: outcome.restored,
        failed: outcome.failed,
    };
    let raw = serde_json::to_string_pretty(&marker)?;
    util::write_atomic(&backup_dir.join(UNDONE_MARKER_FILE), format!("{raw}\n").as_bytes())
}

pub fn is_undone(backup_dir: &Path) -> bool {
    backup_dir.join(UNDONE_MARKER_FILE).is_file()
}

/// Restore every document recorded in one session's journal. Individual
/// failures are reported per document and never abort the rest.
pub fn undo_session(
    backup_dir: &Path,
    backup: &BackupConfig,
    workspace_override: Option<&str>,
) -> Result<UndoOutcome> {
    if !backup_dir.is_dir() {
        return Ok(UndoOutcome::noted(
            Some(backup_dir),
            format!("backup directory not found: {}", backup_dir.display()),
        ));
    }
    let journal_path = backup_dir.join(&backup.journal_file);
    if !journal_path.is_file() {
        return Ok(UndoOutcome::noted(
            Some(backup_dir),
            format!("no journal in {}", backup_dir.display()),
        ));
    }
    let view = match load_view(&journal_path) {
        Ok(view) => view,
        Err(err) => {
            return Ok(UndoOutcome::noted(
                Some(backup_dir),
                format!("journal unreadable: {err:#}"),
            ));
        }
    };
    let Some(root) = workspace_root_for(&view, backup_dir, backup, workspace_override) else {
        return Ok(UndoOutcome::noted(
            Some(backup_dir),
            "journal does not record a workspace root; pass --workspace",
        ));
    };

    let mut outcome = UndoOutcome {
        backup_dir: Some(paths::path_to_string(backup_dir)),
        ..UndoOutcome::default()
    };
    for entry in &view.modifications {
        let restored = restore_entry(entry, backup_dir, &root);
        match restored.status {
            RestoreStatus::Restored => outcome.restored += 1,
            RestoreStatus::Skipped => {}
            _ => outcome.failed += 1,
        }
        outcome.entries.push(restored);
    }
    if outcome.restored == 0 && outcome.failed == 0 {
        outcome.note = Some("journal records no restorable documents".to_string());
    }

    if outcome.restored > 0
        && let Err(err) = write_undone_marker(backup_dir, &outcome)
    {
        tracing::warn!(
            backup_dir = %backup_dir.display(),
            error = %format!("{err:#}"),
            "failed to mark session as undone"
        );
    }
    tracing::info!(
        backup_dir = %backup_dir.display(),
        restored = outcome.restored,
        failed = outcome.failed,
        "undo finished"
    );
    Ok(outcome)
}

fn session_dirs(workspace: &WorkspacePaths, backup: &BackupConfig) -> Result<Vec<PathBuf>> {
    if !workspace.backup_base.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(&workspace.backup_base)
        .with_context(|| format!("failed to read {}", workspace.backup_base.display()))?
    {
        let path = entry?.path();
        let is_session = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&backup.session_prefix));
        if is_session && path.is_dir() {
            dirs.push(path);
        }
    }
    // Timestamped names sort chronologically; collision suffixes sort after.
    dirs.sort();
    Ok(dirs)
}

/// Newest session not yet undone. An older session is never reached past
/// a newer one, even when the newer one has nothing to restore.
pub fn latest_session(workspace: &WorkspacePaths, backup: &BackupConfig) -> Result<Option<PathBuf>> {
    Ok(session_dirs(workspace, backup)?
        .into_iter()
        .rev()
        .find(|dir| !is_undone(dir)))
}

pub fn undo_latest(workspace: &WorkspacePaths, backup: &BackupConfig) -> Result<UndoOutcome> {
    match latest_session(workspace, backup)? {
        Some(dir) => undo_session(&dir, backup, Some(&workspace.root_normalized)),
        None => Ok(UndoOutcome::noted(
            None,
            FixerError::NoBackupSessions(workspace.backup_base.clone()).to_string(),
        )),
    }
}

pub fn list_sessions(workspace: &WorkspacePaths, backup: &BackupConfig) -> Result<Vec<SessionSummary>> {
    let mut out = Vec::new();
    for dir in session_dirs(workspace, backup)? {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let mut summary = SessionSummary {
            name,
            backup_dir: paths::path_to_string(&dir),
            timestamp: None,
            documents: 0,
            fixes: 0,
            cancelled: false,
            undone: is_undone(&dir),
            journal_ok: false,
        };
        if let Ok(journal) = journal::load_journal(&dir.join(&backup.journal_file)) {
            summary.timestamp = Some(journal.timestamp);
            summary.documents = journal.modifications.len();
            summary.fixes = journal.total_fixes;
            summary.cancelled = journal.cancelled;
            summary.journal_ok = true;
        }
        out.push(summary);
    }
    Ok(out)
}

/// Delete the oldest session directories, keeping the newest `keep`.
pub fn prune_sessions(
    workspace: &WorkspacePaths,
    backup: &BackupConfig,
    keep: usize,
) -> Result<PruneOutcome> {
    let dirs = session_dirs(workspace, backup)?;
    let excess = dirs.len().saturating_sub(keep);
    let mut outcome = PruneOutcome {
        kept: dirs.len() - excess,
        removed: Vec::new(),
    };
    for dir in dirs.into_iter().take(excess) {
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        tracing::info!(backup_dir = %dir.display(), "pruned backup session");
        outcome.removed.push(paths::path_to_string(&dir));
    }
    Ok(outcome)
}
