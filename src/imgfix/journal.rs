use crate::error::FixerError;
use crate::imgfix::config::BackupConfig;
use crate::imgfix::paths::{self, WorkspacePaths};
use crate::imgfix::resolver::{MatchCandidate, MatchKind};
use crate::imgfix::util::{session_timestamp, sha256_hex, snapshot_slug, write_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const JOURNAL_SCHEMA_VERSION: u32 = 1;
pub const UNDO_PLAN_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    #[serde(rename = "type")]
    pub kind: MatchKind,
    pub original_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_path: Option<String>,
    pub new_path: String,
    pub absolute_path: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_count: Option<usize>,
}

impl FixRecord {
    pub fn new(raw: &str, new_path: &str, candidate: &MatchCandidate) -> Self {
        Self {
            kind: candidate.kind,
            original_path: raw.to_string(),
            decoded_path: candidate.decoded.clone(),
            new_path: new_path.to_string(),
            absolute_path: candidate.target.clone(),
            confidence: candidate.confidence,
            similarity_score: candidate.similarity_score,
            candidates_count: candidate.candidates_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file: String,
    #[serde(default)]
    pub backup_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_sha256: Option<String>,
    pub original_invalid_count: usize,
    pub fixes: Vec<FixRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionJournal {
    pub schema_version: u32,
    pub timestamp: String,
    pub workspace_root: String,
    pub backup_dir: String,
    pub total_files_processed: usize,
    pub total_references_examined: usize,
    pub total_fixes: usize,
    pub cancelled: bool,
    pub modifications: Vec<FileRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreStep {
    pub snapshot: String,
    pub target: String,
}

/// Fixed-template companion to the journal. Every path is normalized at
/// generation time; the undo routine itself only needs `backup_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoPlan {
    pub format_version: u32,
    pub generated_at: String,
    pub backup_dir: String,
    pub workspace_root: String,
    pub journal_file: String,
    pub restore: Vec<RestoreStep>,
    pub command: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct CommittedSession {
    pub backup_dir: PathBuf,
    pub journal_path: PathBuf,
    pub undo_plan_path: Option<PathBuf>,
    pub journal: SessionJournal,
}

/// Explicit state of one repair session: the backup directory, the
/// snapshots taken so far and the in-memory journal.
#[derive(Debug)]
pub struct SessionContext {
    backup: BackupConfig,
    backup_dir: PathBuf,
    journal: SessionJournal,
    snapshots: BTreeMap<String, Snapshot>,
    used_names: BTreeSet<String>,
}

fn create_unique_dir(base: &Path, stem: &str) -> Result<PathBuf> {
    fs::create_dir_all(base).with_context(|| format!("failed to create {}", base.display()))?;
    for attempt in 1..1000 {
        let name = if attempt == 1 {
            stem.to_string()
        } else {
            format!("{stem}-{attempt}")
        };
        let candidate = base.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create {}", candidate.display()));
            }
        }
    }
    anyhow::bail!("no free backup directory name for {stem} under {}", base.display())
}

/// Create a fresh, timestamp-named backup directory for a new session.
pub fn begin_session(workspace: &WorkspacePaths, backup: &BackupConfig) -> Result<SessionContext> {
    let timestamp = session_timestamp();
    let stem = format!("{}{}", backup.session_prefix, timestamp);
    let backup_dir = create_unique_dir(&workspace.backup_base, &stem)?;
    tracing::info!(backup_dir = %backup_dir.display(), "repair session started");

    Ok(SessionContext {
        backup: backup.clone(),
        journal: SessionJournal {
            schema_version: JOURNAL_SCHEMA_VERSION,
            timestamp,
            workspace_root: workspace.root_normalized.clone(),
            backup_dir: paths::path_to_string(&backup_dir),
            total_files_processed: 0,
            total_references_examined: 0,
            total_fixes: 0,
            cancelled: false,
            modifications: Vec::new(),
        },
        backup_dir,
        snapshots: BTreeMap::new(),
        used_names: BTreeSet::new(),
    })
}

impl SessionContext {
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn snapshot_file_name(&mut self, document_rel: &str) -> String {
        let slug = snapshot_slug(document_rel);
        let mut attempt = 1usize;
        loop {
            let name = if attempt == 1 {
                format!("{slug}.backup")
            } else {
                format!("{slug}-{attempt}.backup")
            };
            if self.used_names.insert(name.clone()) {
                return name;
            }
            attempt += 1;
        }
    }

    /// Copy the document's current bytes into the backup directory. A
    /// document already snapshotted in this session keeps its first copy.
    pub fn snapshot(&mut self, document_abs: &str, document_rel: &str) -> Result<Snapshot> {
        if let Some(existing) = self.snapshots.get(document_rel) {
            return Ok(existing.clone());
        }

        let bytes = fs::read(document_abs)
            .with_context(|| format!("failed to read {document_abs} for snapshot"))?;
        let name = self.snapshot_file_name(document_rel);
        let path = self.backup_dir.join(name);
        write_atomic(&path, &bytes)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;

        let snapshot = Snapshot {
            path,
            sha256: sha256_hex(&bytes),
            bytes: bytes.len(),
        };
        tracing::debug!(
            document = document_rel,
            snapshot = %snapshot.path.display(),
            bytes = snapshot.bytes,
            "snapshot taken"
        );
        self.snapshots
            .insert(document_rel.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub fn record_fix(&mut self, record: FileRecord) {
        self.journal.modifications.push(record);
    }

    pub fn set_totals(
        &mut self,
        files_processed: usize,
        references_examined: usize,
        fixes: usize,
        cancelled: bool,
    ) {
        self.journal.total_files_processed = files_processed;
        self.journal.total_references_examined = references_examined;
        self.journal.total_fixes = fixes;
        self.journal.cancelled = cancelled;
    }

    fn undo_plan(&self) -> UndoPlan {
        let backup_dir = paths::path_to_string(&self.backup_dir);
        let restore = self
            .journal
            .modifications
            .iter()
            .filter_map(|record| {
                let snapshot = record.backup_file.as_ref()?;
                Some(RestoreStep {
                    snapshot: paths::normalize(snapshot),
                    target: paths::join(&self.journal.workspace_root, &record.file),
                })
            })
            .collect();

        UndoPlan {
            format_version: UNDO_PLAN_FORMAT_VERSION,
            generated_at: self.journal.timestamp.clone(),
            workspace_root: paths::normalize(&self.journal.workspace_root),
            journal_file: self.backup.journal_file.clone(),
            command: vec![
                "mdimg".to_string(),
                "undo".to_string(),
                "--backup-dir".to_string(),
                backup_dir.clone(),
            ],
            backup_dir,
            restore,
        }
    }

    /// Persist the journal atomically, then its undo plan. Losing the
    /// journal is fatal; losing the plan is only a warning because undo
    /// reads the journal.
    pub fn commit(self) -> Result<CommittedSession> {
        let journal_path = self.backup_dir.join(&self.backup.journal_file);
        let data = serde_json::to_string_pretty(&self.journal)?;
        if let Err(err) = write_atomic(&journal_path, format!("{data}\n").as_bytes()) {
            tracing::error!(
                journal = %journal_path.display(),
                documents = self.journal.modifications.len(),
                "journal write failed after documents were rewritten"
            );
            return Err(FixerError::JournalWrite {
                path: journal_path,
                reason: format!("{err:#}"),
            }
            .into());
        }

        let plan_path = self.backup_dir.join(&self.backup.undo_plan_file);
        let plan = self.undo_plan();
        let undo_plan_path = match serde_json::to_string_pretty(&plan)
            .map_err(anyhow::Error::from)
            .and_then(|raw| write_atomic(&plan_path, format!("{raw}\n").as_bytes()))
        {
            Ok(()) => Some(plan_path),
            Err(err) => {
                tracing::warn!(
                    plan = %plan_path.display(),
                    error = %format!("{err:#}"),
                    "undo plan write failed; journal remains restorable"
                );
                None
            }
        };

        Ok(CommittedSession {
            backup_dir: self.backup_dir,
            journal_path,
            undo_plan_path,
            journal: self.journal,
        })
    }
}

pub fn load_journal(path: &Path) -> Result<SessionJournal> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn load_undo_plan(path: &Path) -> Result<UndoPlan> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imgfix::paths::resolve_workspace;
    use tempfile::tempdir;

    fn candidate(target: &str) -> MatchCandidate {
        MatchCandidate {
            target: target.to_string(),
            kind: MatchKind::Exact,
            confidence: 1.0,
            decoded: None,
            similarity_score: None,
            candidates_count: Some(1),
        }
    }

    #[test]
    fn begin_session_creates_unique_timestamped_dirs() {
        let tmp = tempdir().expect("tempdir");
        let backup = BackupConfig::default();
        let ws = resolve_workspace(tmp.path(), &backup).expect("ws");

        let first = begin_session(&ws, &backup).expect("first");
        let second = begin_session(&ws, &backup).expect("second");
        assert_ne!(first.backup_dir(), second.backup_dir());
        for ctx in [&first, &second] {
            let name = ctx
                .backup_dir()
                .file_name()
                .and_then(|n| n.to_str())
                .expect("name");
            assert!(name.starts_with("smart_fix_"));
            assert!(ctx.backup_dir().starts_with(&ws.backup_base));
        }
    }

    #[test]
    fn snapshot_is_idempotent_per_document() {
        let tmp = tempdir().expect("tempdir");
        let backup = BackupConfig::default();
        let ws = resolve_workspace(tmp.path(), &backup).expect("ws");
        let doc = tmp.path().join("a.md");
        fs::write(&doc, "first").expect("seed");
        let doc_abs = paths::path_to_string(&doc);

        let mut ctx = begin_session(&ws, &backup).expect("begin");
        let one = ctx.snapshot(&doc_abs, "a.md").expect("snap1");
        fs::write(&doc, "second").expect("mutate");
        let two = ctx.snapshot(&doc_abs, "a.md").expect("snap2");

        assert_eq!(one.path, two.path);
        assert_eq!(fs::read_to_string(&two.path).expect("read"), "first");
        assert_eq!(one.sha256, sha256_hex(b"first"));
    }

    #[test]
    fn same_file_names_in_different_dirs_get_distinct_snapshots() {
        let tmp = tempdir().expect("tempdir");
        let backup = BackupConfig::default();
        let ws = resolve_workspace(tmp.path(), &backup).expect("ws");
        fs::create_dir_all(tmp.path().join("x")).expect("mkdir x");
        fs::create_dir_all(tmp.path().join("y")).expect("mkdir y");
        fs::write(tmp.path().join("x/note.md"), "x").expect("x");
        fs::write(tmp.path().join("y/note.md"), "y").expect("y");

        let mut ctx = begin_session(&ws, &backup).expect("begin");
        let x = ctx
            .snapshot(&ws.document_abs("x/note.md"), "x/note.md")
            .expect("x snap");
        let y = ctx
            .snapshot(&ws.document_abs("y/note.md"), "y/note.md")
            .expect("y snap");
        assert_ne!(x.path, y.path);
        assert_eq!(fs::read_to_string(&y.path).expect("read"), "y");
    }

    #[test]
    fn commit_writes_journal_and_normalized_undo_plan() {
        let tmp = tempdir().expect("tempdir");
        let backup = BackupConfig::default();
        let ws = resolve_workspace(tmp.path(), &backup).expect("ws");
        fs::write(tmp.path().join("a.md"), "![](old.png)").expect("seed");

        let mut ctx = begin_session(&ws, &backup).expect("begin");
        let snap = ctx
            .snapshot(&ws.document_abs("a.md"), "a.md")
            .expect("snapshot");
        ctx.record_fix(FileRecord {
            file: "a.md".to_string(),
            backup_file: Some(paths::path_to_string(&snap.path)),
            backup_sha256: Some(snap.sha256.clone()),
            original_invalid_count: 1,
            fixes: vec![FixRecord::new(
                "old.png",
                "Pic/old.png",
                &candidate(&format!("{}/Pic/old.png", ws.root_normalized)),
            )],
            error: None,
            error_code: None,
        });
        ctx.set_totals(1, 1, 1, false);
        let committed = ctx.commit().expect("commit");

        let journal = load_journal(&committed.journal_path).expect("journal");
        assert_eq!(journal, committed.journal);
        assert_eq!(journal.total_fixes, 1);
        assert_eq!(journal.modifications[0].fixes[0].kind, MatchKind::Exact);

        let raw = fs::read_to_string(&committed.journal_path).expect("raw");
        assert!(raw.contains("\"type\": \"exact_match\""));
        assert!(!raw.contains("decoded_path"));

        let plan = load_undo_plan(committed.undo_plan_path.as_deref().expect("plan path"))
            .expect("plan");
        assert_eq!(plan.format_version, UNDO_PLAN_FORMAT_VERSION);
        assert_eq!(plan.workspace_root, ws.root_normalized);
        assert!(!plan.backup_dir.contains('\\'));
        assert_eq!(plan.restore.len(), 1);
        assert_eq!(plan.restore[0].target, format!("{}/a.md", ws.root_normalized));
        assert_eq!(plan.command.last(), Some(&plan.backup_dir));
    }

    #[test]
    fn commit_failure_is_a_journal_write_error() {
        let tmp = tempdir().expect("tempdir");
        let backup = BackupConfig::default();
        let ws = resolve_workspace(tmp.path(), &backup).expect("ws");
        let ctx = begin_session(&ws, &backup).expect("begin");
        let dir = ctx.backup_dir().to_path_buf();
        fs::remove_dir_all(&dir).expect("remove backup dir");
        fs::write(&dir, "not a directory").expect("block dir");

        let err = ctx.commit().expect_err("commit must fail");
        assert!(matches!(
            err.downcast_ref::<FixerError>(),
            Some(FixerError::JournalWrite { .. })
        ));
    }
}
