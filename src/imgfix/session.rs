use crate::error::ErrorCode;
use crate::imgfix::audit;
use crate::imgfix::config::FixerConfig;
use crate::imgfix::index::CandidateIndex;
use crate::imgfix::journal::{self, FileRecord, FixRecord, SessionContext};
use crate::imgfix::lock::SessionLock;
use crate::imgfix::manifest::{DocumentRefs, RepairManifest};
use crate::imgfix::paths::{self, WorkspacePaths};
use crate::imgfix::report::{SessionReport, Tally, UnresolvedReference};
use crate::imgfix::resolver::{MatchCandidate, Resolver};
use crate::imgfix::rewrite::{self, AcceptedMatch};
use crate::imgfix::scan;
use crate::imgfix::util::{sha256_hex, write_atomic};
use crate::imgfix::warn::{self, WarnEvent};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop flag, checked before each document.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub dry_run: bool,
    pub verify: bool,
}

struct DocumentFailure<'a> {
    code: ErrorCode,
    stage: &'a str,
    reason: &'a str,
    err: String,
}

fn failure_record(
    doc: &DocumentRefs,
    failure: &DocumentFailure<'_>,
    snapshot: Option<&journal::Snapshot>,
) -> FileRecord {
    FileRecord {
        file: doc.document_rel.clone(),
        backup_file: snapshot.map(|s| paths::path_to_string(&s.path)),
        backup_sha256: snapshot.map(|s| s.sha256.clone()),
        original_invalid_count: doc.references.len(),
        fixes: Vec::new(),
        error: Some(format!("{}: {}", failure.reason, failure.err)),
        error_code: Some(failure.code.as_str().to_string()),
    }
}

fn report_failure(
    doc: &DocumentRefs,
    failure: DocumentFailure<'_>,
    snapshot: Option<&journal::Snapshot>,
    ctx: Option<&mut SessionContext>,
    tally: &mut Tally,
) {
    warn::emit(WarnEvent {
        code: failure.code,
        stage: failure.stage,
        action: "skip document",
        document: &doc.document_rel,
        reference: "",
        reason: failure.reason,
        err: &failure.err,
    });
    tally.fail(&doc.document_rel, format!("{}: {}", failure.reason, failure.err));
    if let Some(ctx) = ctx {
        ctx.record_fix(failure_record(doc, &failure, snapshot));
    }
}

/// Resolve every reference of one document; unresolved ones land in the
/// tally. Repeated raw strings collapse onto their first occurrence.
fn resolve_document(
    resolver: &Resolver<'_>,
    doc: &DocumentRefs,
    tally: &mut Tally,
) -> Vec<(String, MatchCandidate)> {
    let mut seen = BTreeSet::new();
    let mut accepted = Vec::new();
    for raw in &doc.references {
        tally.references_examined += 1;
        let reference = raw.trim();
        if reference.is_empty() || !seen.insert(reference.to_string()) {
            tally.duplicate_references += 1;
            continue;
        }
        match resolver.resolve(reference) {
            Some(found) if resolver.accepts(&found) => {
                tracing::debug!(
                    document = %doc.document_rel,
                    reference,
                    target = %found.target,
                    kind = %found.kind,
                    confidence = found.confidence,
                    "reference resolved"
                );
                accepted.push((reference.to_string(), found));
            }
            _ => tally.unresolved.push(UnresolvedReference {
                document: doc.document_rel.clone(),
                reference: reference.to_string(),
            }),
        }
    }
    accepted
}

fn process_document(
    resolver: &Resolver<'_>,
    doc: &DocumentRefs,
    ctx: Option<&mut SessionContext>,
    tally: &mut Tally,
) {
    let accepted = resolve_document(resolver, doc, tally);
    if accepted.is_empty() {
        return;
    }

    let original = match fs::read(&doc.document_abs) {
        Ok(bytes) => bytes,
        Err(err) => {
            let failure = DocumentFailure {
                code: ErrorCode::E004DocumentIo,
                stage: "read",
                reason: "document unreadable",
                err: err.to_string(),
            };
            report_failure(doc, failure, None, ctx, tally);
            return;
        }
    };
    let text = match std::str::from_utf8(&original) {
        Ok(text) => text,
        Err(err) => {
            let failure = DocumentFailure {
                code: ErrorCode::E004DocumentIo,
                stage: "read",
                reason: "document is not valid UTF-8",
                err: err.to_string(),
            };
            report_failure(doc, failure, None, ctx, tally);
            return;
        }
    };

    let document_dir = paths::parent(&doc.document_abs);
    let matches: Vec<AcceptedMatch> = accepted
        .iter()
        .map(|(raw, found)| AcceptedMatch {
            raw: raw.clone(),
            target: found.target.clone(),
        })
        .collect();
    let outcome = match rewrite::rewrite(text, &document_dir, &matches) {
        Ok(outcome) => outcome,
        Err(err) => {
            let failure = DocumentFailure {
                code: ErrorCode::E004DocumentIo,
                stage: "rewrite",
                reason: "rewrite failed",
                err: format!("{err:#}"),
            };
            report_failure(doc, failure, None, ctx, tally);
            return;
        }
    };

    tally.stale_references += accepted.len() - outcome.applied_count();
    if outcome.applied.is_empty() || outcome.text == text {
        tracing::debug!(
            document = %doc.document_rel,
            "resolved references not present in document text"
        );
        return;
    }

    let by_raw: BTreeMap<&str, &MatchCandidate> = accepted
        .iter()
        .map(|(raw, found)| (raw.as_str(), found))
        .collect();
    let fixes: Vec<FixRecord> = outcome
        .applied
        .iter()
        .filter_map(|(raw, new_path)| {
            by_raw
                .get(raw.as_str())
                .map(|found| FixRecord::new(raw, new_path, found))
        })
        .collect();

    let Some(ctx) = ctx else {
        // Dry run: report what would change, touch nothing.
        tally.documents_rewritten += 1;
        tally.records.push(FileRecord {
            file: doc.document_rel.clone(),
            backup_file: None,
            backup_sha256: None,
            original_invalid_count: doc.references.len(),
            fixes,
            error: None,
            error_code: None,
        });
        return;
    };

    let snapshot = match ctx.snapshot(&doc.document_abs, &doc.document_rel) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            let failure = DocumentFailure {
                code: ErrorCode::E003SnapshotFailed,
                stage: "snapshot",
                reason: "snapshot failed; document left untouched",
                err: format!("{err:#}"),
            };
            report_failure(doc, failure, None, Some(ctx), tally);
            return;
        }
    };
    if snapshot.sha256 != sha256_hex(&original) {
        let failure = DocumentFailure {
            code: ErrorCode::E004DocumentIo,
            stage: "snapshot",
            reason: "document changed while the session was running",
            err: snapshot.sha256.clone(),
        };
        report_failure(doc, failure, Some(&snapshot), Some(ctx), tally);
        return;
    }

    if let Err(err) = write_atomic(Path::new(&doc.document_abs), outcome.text.as_bytes()) {
        let failure = DocumentFailure {
            code: ErrorCode::E004DocumentIo,
            stage: "write",
            reason: "document write failed",
            err: format!("{err:#}"),
        };
        report_failure(doc, failure, Some(&snapshot), Some(ctx), tally);
        return;
    }

    let record = FileRecord {
        file: doc.document_rel.clone(),
        backup_file: Some(paths::path_to_string(&snapshot.path)),
        backup_sha256: Some(snapshot.sha256.clone()),
        original_invalid_count: doc.references.len(),
        fixes,
        error: None,
        error_code: None,
    };
    tally.documents_rewritten += 1;
    tally.records.push(record.clone());
    ctx.record_fix(record);
}

/// Re-read the manifest's documents and count local references that still
/// point nowhere. Unreadable documents keep their manifest count.
pub fn count_remaining(documents: &[DocumentRefs]) -> usize {
    documents
        .iter()
        .map(|doc| match scan::dangling_in_document(&doc.document_abs) {
            Ok(dangling) => dangling.len(),
            Err(err) => {
                tracing::debug!(document = %doc.document_rel, error = %format!("{err:#}"), "rescan skipped");
                doc.references.len()
            }
        })
        .sum()
}

/// Run one repair session over the manifest: resolve, snapshot, rewrite,
/// journal. Per-document failures are recorded and never abort the run;
/// a journal write failure does.
pub fn run_session(
    workspace: &WorkspacePaths,
    config: &FixerConfig,
    manifest: &RepairManifest,
    opts: &SessionOptions,
    cancel: &CancelToken,
) -> Result<SessionReport> {
    let catalogue = manifest.normalized_catalogue();
    let index = CandidateIndex::build(&catalogue);
    let resolver = Resolver::new(&index, &catalogue, &config.matching);
    let documents = manifest.documents(workspace);
    tracing::info!(
        documents = documents.len(),
        references = manifest.reference_count(),
        catalogue = catalogue.len(),
        names = index.names(),
        dry_run = opts.dry_run,
        "repair session planned"
    );

    let _lock = if opts.dry_run {
        None
    } else {
        Some(SessionLock::acquire(workspace)?)
    };
    let mut ctx = if opts.dry_run {
        None
    } else {
        let ctx = journal::begin_session(workspace, &config.backup)?;
        audit::record(
            workspace,
            "repair",
            "started",
            &paths::path_to_string(ctx.backup_dir()),
        );
        Some(ctx)
    };

    let mut tally = Tally::default();
    for doc in &documents {
        if cancel.is_cancelled() {
            tally.cancelled = true;
            tracing::warn!(
                processed = tally.documents_examined,
                remaining = documents.len() - tally.documents_examined,
                "repair session cancelled"
            );
            break;
        }
        tally.documents_examined += 1;
        process_document(&resolver, doc, ctx.as_mut(), &mut tally);
    }

    let mut committed = None;
    if let Some(mut ctx) = ctx {
        ctx.set_totals(
            tally.documents_rewritten,
            tally.references_examined,
            tally.fix_count(),
            tally.cancelled,
        );
        match ctx.commit() {
            Ok(done) => committed = Some(done),
            Err(err) => {
                audit::record(workspace, "repair", "journal_failed", &format!("{err:#}"));
                return Err(err);
            }
        }
    }

    let actual_remaining = (opts.verify && !opts.dry_run).then(|| count_remaining(&documents));
    let mut report = tally.finish(opts.dry_run, actual_remaining);
    if let Some(done) = committed {
        report.backup_dir = Some(paths::path_to_string(&done.backup_dir));
        report.journal_path = Some(paths::path_to_string(&done.journal_path));
        report.undo_plan_path = done.undo_plan_path.as_deref().map(paths::path_to_string);
        audit::record(
            workspace,
            "repair",
            if report.cancelled { "cancelled" } else { "committed" },
            &format!(
                "documents={} fixes={} backup_dir={}",
                report.documents_rewritten,
                report.references_fixed,
                paths::path_to_string(&done.backup_dir)
            ),
        );
    }
    tracing::info!(
        documents_rewritten = report.documents_rewritten,
        references_fixed = report.references_fixed,
        unresolved = report.unresolved.len(),
        grade = %report.grade,
        "repair session finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imgfix::paths::resolve_workspace;
    use crate::imgfix::resolver::MatchKind;
    use crate::imgfix::undo;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        tmp: TempDir,
        ws: WorkspacePaths,
        cfg: FixerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempdir().expect("tempdir");
            let cfg = FixerConfig::default();
            let ws = resolve_workspace(tmp.path(), &cfg.backup).expect("ws");
            Self { tmp, ws, cfg }
        }

        fn write(&self, rel: &str, body: &[u8]) {
            let path = self.tmp.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("mkdir");
            }
            fs::write(path, body).expect("write");
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.tmp.path().join(rel)).expect("read")
        }

        fn abs(&self, rel: &str) -> String {
            format!("{}/{rel}", self.ws.root_normalized)
        }

        fn run(&self, manifest: &RepairManifest, opts: &SessionOptions) -> SessionReport {
            run_session(&self.ws, &self.cfg, manifest, opts, &CancelToken::new()).expect("session")
        }
    }

    fn manifest(catalogue: Vec<String>, dangling: &[(&str, &[&str])]) -> RepairManifest {
        RepairManifest {
            workspace_root: None,
            catalogue,
            dangling: dangling
                .iter()
                .map(|(doc, refs)| {
                    (
                        doc.to_string(),
                        refs.iter().map(|r| r.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }

    fn live() -> SessionOptions {
        SessionOptions {
            dry_run: false,
            verify: true,
        }
    }

    #[test]
    fn backslash_reference_is_rewritten_and_journaled() {
        let fx = Fixture::new();
        fx.write("Pic/img.png", b"png");
        fx.write("note.md", b"see ![shot](Pic\\img.png) here\n");
        let m = manifest(vec![fx.abs("Pic/img.png")], &[("note.md", &["Pic\\img.png"])]);

        let report = fx.run(&m, &live());
        assert_eq!(report.references_fixed, 1);
        assert_eq!(report.documents_rewritten, 1);
        assert_eq!(report.actual_remaining, Some(0));
        assert_eq!(fx.read("note.md"), "see ![shot](Pic/img.png) here\n");

        let journal = journal::load_journal(Path::new(report.journal_path.as_deref().expect("journal")))
            .expect("load");
        assert_eq!(journal.modifications.len(), 1);
        let fix = &journal.modifications[0].fixes[0];
        assert_eq!(fix.kind, MatchKind::Exact);
        assert_eq!(fix.original_path, "Pic\\img.png");
        assert_eq!(fix.new_path, "Pic/img.png");
    }

    #[test]
    fn two_raws_to_one_target_count_twice() {
        let fx = Fixture::new();
        fx.write("Pic/img.png", b"png");
        fx.write(
            "note.md",
            b"![a](old/img.png) and <img src=\"other/img.png\">\n",
        );
        let m = manifest(
            vec![fx.abs("Pic/img.png")],
            &[("note.md", &["old/img.png", "other/img.png"])],
        );

        let report = fx.run(&m, &live());
        assert_eq!(report.references_fixed, 2);
        assert_eq!(report.distinct_references_fixed, 2);
        assert_eq!(report.distinct_targets, 1);
        assert_eq!(report.documents_rewritten, 1);
        assert_eq!(
            fx.read("note.md"),
            "![a](Pic/img.png) and <img src=\"Pic/img.png\">\n"
        );
    }

    #[test]
    fn every_recorded_fix_clears_the_gate() {
        let fx = Fixture::new();
        fx.write("a/image-2020.png", b"1");
        fx.write("b/image-2020.png", b"2");
        fx.write("note.md", b"![](x/y/image-2020.png) ![](z/a/image-2020.png)\n");
        let m = manifest(
            vec![fx.abs("a/image-2020.png"), fx.abs("b/image-2020.png")],
            &[("note.md", &["x/y/image-2020.png", "z/a/image-2020.png"])],
        );

        let report = fx.run(&m, &live());
        for fix in report.modifications.iter().flat_map(|r| r.fixes.iter()) {
            assert!(fix.kind.is_unique_exact() || fix.confidence > 0.9);
        }
        assert_eq!(
            report.references_fixed + report.unresolved.len(),
            report.references_examined
        );
    }

    #[test]
    fn dry_run_writes_nothing() {
        let fx = Fixture::new();
        fx.write("Pic/img.png", b"png");
        fx.write("note.md", b"![](lost/img.png)\n");
        let m = manifest(vec![fx.abs("Pic/img.png")], &[("note.md", &["lost/img.png"])]);

        let report = fx.run(
            &m,
            &SessionOptions {
                dry_run: true,
                verify: true,
            },
        );
        assert!(report.dry_run);
        assert_eq!(report.references_fixed, 1);
        assert!(report.backup_dir.is_none());
        assert_eq!(report.actual_remaining, None);
        assert_eq!(fx.read("note.md"), "![](lost/img.png)\n");
        assert!(!fx.ws.backup_base.exists());
    }

    #[test]
    fn snapshot_failure_leaves_document_untouched() {
        let fx = Fixture::new();
        fx.write("Pic/img.png", b"png");
        fx.write("note.md", b"![](lost/img.png)\n");
        let m = manifest(vec![fx.abs("Pic/img.png")], &[("note.md", &["lost/img.png"])]);
        let catalogue = m.normalized_catalogue();
        let index = CandidateIndex::build(&catalogue);
        let resolver = Resolver::new(&index, &catalogue, &fx.cfg.matching);
        let docs = m.documents(&fx.ws);

        let mut ctx = journal::begin_session(&fx.ws, &fx.cfg.backup).expect("begin");
        let dir = ctx.backup_dir().to_path_buf();
        fs::remove_dir_all(&dir).expect("remove session dir");
        fs::write(&dir, "not a directory").expect("block session dir");

        let mut tally = Tally::default();
        process_document(&resolver, &docs[0], Some(&mut ctx), &mut tally);
        assert_eq!(fx.read("note.md"), "![](lost/img.png)\n");
        assert_eq!(tally.documents_failed, 1);
        assert_eq!(tally.documents_rewritten, 0);

        fs::remove_file(&dir).expect("unblock session dir");
        fs::create_dir(&dir).expect("recreate session dir");
        let committed = ctx.commit().expect("commit");
        let record = &committed.journal.modifications[0];
        assert_eq!(record.error_code.as_deref(), Some("E003_SNAPSHOT_FAILED"));
        assert!(record.backup_file.is_none());
        assert!(record.fixes.is_empty());
    }

    #[test]
    fn cancelled_session_still_commits_journal() {
        let fx = Fixture::new();
        fx.write("Pic/img.png", b"png");
        fx.write("note.md", b"![](lost/img.png)\n");
        let m = manifest(vec![fx.abs("Pic/img.png")], &[("note.md", &["lost/img.png"])]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let report = run_session(&fx.ws, &fx.cfg, &m, &live(), &cancel).expect("session");
        assert!(report.cancelled);
        assert_eq!(report.documents_examined, 0);
        let journal = journal::load_journal(Path::new(report.journal_path.as_deref().expect("journal")))
            .expect("load");
        assert!(journal.cancelled);
        assert!(journal.modifications.is_empty());
        assert_eq!(fx.read("note.md"), "![](lost/img.png)\n");
    }

    #[test]
    fn repair_then_undo_restores_exact_bytes() {
        let fx = Fixture::new();
        fx.write("Pic/img.png", b"png");
        let original = b"line one\r\n![](lost/img.png)\r\n\xE7\x99\xBD\r\n";
        fx.write("docs/note.md", original);
        let m = manifest(
            vec![fx.abs("Pic/img.png")],
            &[("docs/note.md", &["lost/img.png"])],
        );

        let report = fx.run(&m, &live());
        assert_eq!(report.references_fixed, 1);
        assert!(fx.read("docs/note.md").contains("](../Pic/img.png)"));

        let outcome = undo::undo_latest(&fx.ws, &fx.cfg.backup).expect("undo");
        assert_eq!(outcome.restored, 1);
        assert_eq!(
            fs::read(fx.tmp.path().join("docs/note.md")).expect("read"),
            original
        );
    }

    #[test]
    fn unreadable_document_is_recorded_and_others_continue() {
        let fx = Fixture::new();
        fx.write("Pic/img.png", b"png");
        fx.write("b.md", b"![](lost/img.png)\n");
        let m = manifest(
            vec![fx.abs("Pic/img.png")],
            &[("a.md", &["lost/img.png"]), ("b.md", &["lost/img.png"])],
        );

        let report = fx.run(&m, &live());
        assert_eq!(report.documents_failed, 1);
        assert_eq!(report.documents_rewritten, 1);
        assert_eq!(report.errors.len(), 1);
        let journal = journal::load_journal(Path::new(report.journal_path.as_deref().expect("journal")))
            .expect("load");
        let failed = journal
            .modifications
            .iter()
            .find(|r| r.file == "a.md")
            .expect("failure record");
        assert_eq!(failed.error_code.as_deref(), Some("E004_DOCUMENT_IO"));
        assert!(failed.backup_file.is_none());
    }
}
