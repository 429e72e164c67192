use crate::imgfix::paths;
use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeSet;

/// One dangling reference and the catalogue path it should point at.
#[derive(Debug, Clone)]
pub struct AcceptedMatch {
    pub raw: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub text: String,
    /// Raw reference string -> path written in its place, for every raw
    /// string that was actually substituted at least once.
    pub applied: Vec<(String, String)>,
}

impl RewriteOutcome {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Path written into the document for `target`, relative to the
/// document's directory when the two share a root.
pub fn replacement_path(target: &str, document_dir: &str) -> String {
    paths::safe_relpath(target, document_dir)
}

fn inline_pattern(raw: &str) -> Result<Regex> {
    let pattern = format!(r"!\[([^\]]*)\]\(\s*{}\s*\)", regex::escape(raw));
    Regex::new(&pattern).with_context(|| format!("failed to build inline pattern for {raw}"))
}

fn tag_pattern(raw: &str) -> Result<Regex> {
    let escaped = regex::escape(raw);
    let pattern = format!(
        r#"(?i:(<img))([^>]*?\s)(?i:(src))(\s*=\s*)(?:("){escaped}"|('){escaped}')([^>]*)>"#
    );
    Regex::new(&pattern).with_context(|| format!("failed to build tag pattern for {raw}"))
}

/// Substitute every accepted match in both `![alt](raw)` and
/// `<img ... src="raw" ...>` forms. Only references carrying the exact raw
/// string are touched.
pub fn rewrite(text: &str, document_dir: &str, matches: &[AcceptedMatch]) -> Result<RewriteOutcome> {
    let mut current = text.to_string();
    let mut applied = Vec::new();
    let mut seen = BTreeSet::new();

    for accepted in matches {
        if accepted.raw.is_empty() || !seen.insert(accepted.raw.as_str()) {
            continue;
        }
        let new_path = replacement_path(&accepted.target, document_dir);
        let mut changed = false;

        let inline = inline_pattern(&accepted.raw)?;
        let next = inline.replace_all(&current, |caps: &Captures| {
            format!("![{}]({})", &caps[1], new_path)
        });
        if next != current {
            current = next.into_owned();
            changed = true;
        }

        let tag = tag_pattern(&accepted.raw)?;
        let next = tag.replace_all(&current, |caps: &Captures| {
            let quote = if caps.get(5).is_some() { "\"" } else { "'" };
            format!(
                "{}{}{}{}{quote}{new_path}{quote}{}>",
                &caps[1], &caps[2], &caps[3], &caps[4], &caps[7]
            )
        });
        if next != current {
            current = next.into_owned();
            changed = true;
        }

        if changed {
            applied.push((accepted.raw.clone(), new_path));
        }
    }

    Ok(RewriteOutcome {
        text: current,
        applied,
    })
}
