use crate::imgfix::paths;
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn inline_refs() -> Result<&'static Regex> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)!\[.*?\]\((.*?)\)"))
        .as_ref()
        .map_err(|err| anyhow!("invalid inline image pattern: {err}"))
}

fn tag_refs() -> Result<&'static Regex> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["'][^>]*>"#))
        .as_ref()
        .map_err(|err| anyhow!("invalid img tag pattern: {err}"))
}

/// Image references in document order: inline forms first, then tags.
pub fn extract_references(text: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for re in [inline_refs()?, tag_refs()?] {
        for caps in re.captures_iter(text) {
            let Some(found) = caps.get(1) else {
                continue;
            };
            let trimmed = found.as_str().trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }
    Ok(out)
}

pub fn is_remote(reference: &str) -> bool {
    let lowered = reference.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("data:")
        || lowered.starts_with("//")
}

/// Local references in `text` that do not resolve to an existing file
/// relative to `document_dir`.
pub fn dangling_in_text(text: &str, document_dir: &str) -> Result<Vec<String>> {
    Ok(extract_references(text)?
        .into_iter()
        .filter(|reference| !is_remote(reference))
        .filter(|reference| !Path::new(&paths::join(document_dir, reference)).exists())
        .collect())
}

pub fn dangling_in_document(document_abs: &str) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(document_abs)
        .with_context(|| format!("failed to read {document_abs}"))?;
    dangling_in_text(&text, &paths::parent(document_abs))
}
