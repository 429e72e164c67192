use crate::imgfix::journal::{FileRecord, FixRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub document: String,
    pub reference: String,
}

/// Outcome of one repair session, assembled after the journal is committed
/// (or, for a dry run, after matching finished).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub dry_run: bool,
    pub cancelled: bool,
    pub documents_examined: usize,
    pub documents_rewritten: usize,
    pub documents_failed: usize,
    pub references_examined: usize,
    pub references_fixed: usize,
    pub duplicate_references: usize,
    pub stale_references: usize,
    pub distinct_references_fixed: usize,
    pub distinct_targets: usize,
    pub per_kind: BTreeMap<String, usize>,
    pub naive_remaining: usize,
    pub actual_remaining: Option<usize>,
    pub fix_ratio: f64,
    pub grade: String,
    pub backup_dir: Option<String>,
    pub journal_path: Option<String>,
    pub undo_plan_path: Option<String>,
    pub unresolved: Vec<UnresolvedReference>,
    pub errors: Vec<String>,
    pub modifications: Vec<FileRecord>,
}

pub fn grade(fix_ratio: f64) -> &'static str {
    if fix_ratio >= 0.9 {
        "excellent"
    } else if fix_ratio >= 0.8 {
        "good"
    } else if fix_ratio >= 0.7 {
        "fair"
    } else {
        "poor"
    }
}

/// Running counters the orchestrator feeds while it walks documents.
#[derive(Debug, Default)]
pub struct Tally {
    pub documents_examined: usize,
    pub documents_rewritten: usize,
    pub documents_failed: usize,
    pub references_examined: usize,
    pub duplicate_references: usize,
    pub stale_references: usize,
    pub cancelled: bool,
    pub unresolved: Vec<UnresolvedReference>,
    pub errors: Vec<String>,
    pub records: Vec<FileRecord>,
}

impl Tally {
    pub fn fixes(&self) -> impl Iterator<Item = &FixRecord> {
        self.records.iter().flat_map(|record| record.fixes.iter())
    }

    pub fn fix_count(&self) -> usize {
        self.fixes().count()
    }

    pub fn fail(&mut self, document: &str, message: impl Into<String>) {
        self.documents_failed += 1;
        self.errors.push(format!("{document}: {}", message.into()));
    }

    pub fn finish(self, dry_run: bool, actual_remaining: Option<usize>) -> SessionReport {
        let references_fixed = self.fix_count();
        let mut per_kind = BTreeMap::new();
        let mut raws = BTreeSet::new();
        let mut targets = BTreeSet::new();
        for fix in self.fixes() {
            *per_kind.entry(fix.kind.as_str().to_string()).or_insert(0) += 1;
            raws.insert(fix.original_path.as_str());
            targets.insert(fix.absolute_path.as_str());
        }
        let distinct_references_fixed = raws.len();
        let distinct_targets = targets.len();

        let fix_ratio = if self.references_examined == 0 {
            1.0
        } else {
            references_fixed as f64 / self.references_examined as f64
        };

        SessionReport {
            dry_run,
            cancelled: self.cancelled,
            documents_examined: self.documents_examined,
            documents_rewritten: self.documents_rewritten,
            documents_failed: self.documents_failed,
            references_examined: self.references_examined,
            references_fixed,
            duplicate_references: self.duplicate_references,
            stale_references: self.stale_references,
            distinct_references_fixed,
            distinct_targets,
            per_kind,
            naive_remaining: self.references_examined.saturating_sub(references_fixed),
            actual_remaining,
            fix_ratio,
            grade: grade(fix_ratio).to_string(),
            backup_dir: None,
            journal_path: None,
            undo_plan_path: None,
            unresolved: self.unresolved,
            errors: self.errors,
            modifications: self.records,
        }
    }
}

impl SessionReport {
    /// `key=value` lines in the style the command layer prints.
    pub fn detail_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("dry_run={}", self.dry_run),
            format!("documents_examined={}", self.documents_examined),
            format!("documents_rewritten={}", self.documents_rewritten),
            format!("documents_failed={}", self.documents_failed),
            format!("references_examined={}", self.references_examined),
            format!("references_fixed={}", self.references_fixed),
            format!("distinct_references_fixed={}", self.distinct_references_fixed),
            format!("distinct_targets={}", self.distinct_targets),
        ];
        for (kind, count) in &self.per_kind {
            lines.push(format!("fixes.{kind}={count}"));
        }
        lines.push(format!("naive_remaining={}", self.naive_remaining));
        if let Some(actual) = self.actual_remaining {
            lines.push(format!("actual_remaining={actual}"));
        }
        lines.push(format!("fix_ratio={:.3}", self.fix_ratio));
        lines.push(format!("grade={}", self.grade));
        if self.cancelled {
            lines.push("cancelled=true".to_string());
        }
        if let Some(dir) = &self.backup_dir {
            lines.push(format!("backup_dir={dir}"));
        }
        if let Some(journal) = &self.journal_path {
            lines.push(format!("journal={journal}"));
        }
        if let Some(plan) = &self.undo_plan_path {
            lines.push(format!("undo_plan={plan}"));
        }
        for miss in &self.unresolved {
            lines.push(format!("unresolved={} -> {}", miss.document, miss.reference));
        }
        lines
    }
}
