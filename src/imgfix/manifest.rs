use crate::error::FixerError;
use crate::imgfix::paths::{self, WorkspacePaths};
use anyhow::Result;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Output of the external scan: the image catalogue plus the dangling
/// references found in each document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepairManifest {
    pub workspace_root: Option<String>,
    pub catalogue: Vec<String>,
    pub dangling: BTreeMap<String, Vec<String>>,
}

/// One document's references after path resolution and grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRefs {
    pub document_abs: String,
    pub document_rel: String,
    pub references: Vec<String>,
}

impl RepairManifest {
    pub fn parse(raw: &str) -> Result<Self> {
        json5::from_str(raw).map_err(|err| FixerError::InvalidManifest(err.to_string()).into())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            FixerError::InvalidManifest(format!("failed to read {}: {err}", path.display()))
        })?;
        json5::from_str(&raw).map_err(|err| {
            FixerError::InvalidManifest(format!("{}: {err}", path.display())).into()
        })
    }

    /// Normalized catalogue with duplicates dropped, first occurrence kept.
    pub fn normalized_catalogue(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.catalogue
            .iter()
            .map(|entry| paths::normalize(entry.trim()))
            .filter(|entry| !entry.is_empty())
            .filter(|entry| seen.insert(entry.clone()))
            .collect()
    }

    /// Documents keyed by workspace-relative path, in sorted order. Entries
    /// naming the same document in different spellings are merged.
    pub fn documents(&self, workspace: &WorkspacePaths) -> Vec<DocumentRefs> {
        let mut grouped: BTreeMap<String, DocumentRefs> = BTreeMap::new();
        for (document, references) in &self.dangling {
            let document_abs = workspace.document_abs(document.trim());
            let document_rel = workspace.document_rel(&document_abs);
            let entry = grouped
                .entry(document_rel.clone())
                .or_insert_with(|| DocumentRefs {
                    document_abs,
                    document_rel,
                    references: Vec::new(),
                });
            entry.references.extend(references.iter().cloned());
        }
        grouped.into_values().collect()
    }

    pub fn reference_count(&self) -> usize {
        self.dangling.values().map(Vec::len).sum()
    }
}
