use crate::imgfix::config::BackupConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Canonical single-separator form of a path string.
///
/// Backslashes become `/`, runs of `/` collapse, and a trailing `/` is
/// dropped unless the whole value is a root (`/` or a drive root `X:/`).
/// Idempotent; never fails.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(path.len());
    let mut prev_sep = false;
    for ch in path.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if prev_sep {
                continue;
            }
            prev_sep = true;
        } else {
            prev_sep = false;
        }
        out.push(ch);
    }

    if out.len() > 1 && out.ends_with('/') && !is_drive_root(&out) {
        out.pop();
    }
    out
}

fn is_drive_root(normalized: &str) -> bool {
    let bytes = normalized.as_bytes();
    bytes.len() == 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

fn drive_prefix(normalized: &str) -> Option<&str> {
    let bytes = normalized.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return normalized.get(..2);
    }
    None
}

pub fn is_absolute(path: &str) -> bool {
    let normalized = normalize(path);
    normalized.starts_with('/') || drive_prefix(&normalized).is_some()
}

/// Last segment of the normalized path.
pub fn file_name(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => normalized,
    }
}

/// Everything before the last segment; empty for a bare name.
pub fn parent(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((dir, _)) if dir.len() == 2 && drive_prefix(dir).is_some() => format!("{dir}/"),
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

pub fn segments(path: &str) -> Vec<String> {
    normalize(path).split('/').map(ToOwned::to_owned).collect()
}

fn split_root(normalized: &str) -> (String, Vec<&str>) {
    let (root, rest) = if let Some(drive) = drive_prefix(normalized) {
        (
            format!("{}/", drive.to_ascii_uppercase()),
            normalized[2..].trim_start_matches('/'),
        )
    } else if let Some(rest) = normalized.strip_prefix('/') {
        ("/".to_string(), rest)
    } else {
        (String::new(), normalized)
    };
    let parts = rest.split('/').filter(|s| !s.is_empty()).collect();
    (root, parts)
}

/// Lexically resolve `reference` against `base_dir`, folding `.` and `..`.
pub fn join(base_dir: &str, reference: &str) -> String {
    let reference = normalize(reference);
    let combined = if is_absolute(&reference) || base_dir.is_empty() {
        reference
    } else {
        format!("{}/{}", normalize(base_dir), reference)
    };

    let normalized = normalize(&combined);
    let (root, parts) = split_root(&normalized);
    let mut stack: Vec<&str> = Vec::new();
    for part in parts {
        match part {
            "." => {}
            ".." => {
                if stack.last().is_some_and(|last| *last != "..") {
                    stack.pop();
                } else if root.is_empty() {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }

    let body = stack.join("/");
    if root.is_empty() {
        if body.is_empty() { ".".to_string() } else { body }
    } else {
        normalize(&format!("{root}{body}"))
    }
}

/// Relative path from `base_dir` to `target`; `None` when the two do not
/// share a root (different drives, or either side is not absolute).
pub fn relative_to(target: &str, base_dir: &str) -> Option<String> {
    let target = join("", target);
    let base = join("", base_dir);
    if !is_absolute(&target) || !is_absolute(&base) {
        return None;
    }

    let (target_root, target_parts) = split_root(&target);
    let (base_root, base_parts) = split_root(&base);
    if target_root != base_root {
        return None;
    }

    let case_insensitive = target_root.len() == 3;
    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| {
            if case_insensitive {
                a.eq_ignore_ascii_case(b)
            } else {
                a == b
            }
        })
        .count();

    let mut out: Vec<&str> = Vec::new();
    out.extend(std::iter::repeat_n("..", base_parts.len() - common));
    out.extend(target_parts[common..].iter().copied());
    if out.is_empty() {
        return Some(".".to_string());
    }
    Some(out.join("/"))
}

/// Relative path when one exists, otherwise the normalized absolute target.
pub fn safe_relpath(target: &str, base_dir: &str) -> String {
    relative_to(target, base_dir).unwrap_or_else(|| normalize(target))
}

pub fn path_to_string(path: &Path) -> String {
    normalize(&path.to_string_lossy())
}

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub root_normalized: String,
    pub backup_base: PathBuf,
    pub lock_file: PathBuf,
    pub audit_log: PathBuf,
}

impl WorkspacePaths {
    /// Absolute, normalized form of a document path given either absolute
    /// or relative to the workspace root.
    pub fn document_abs(&self, document: &str) -> String {
        join(&self.root_normalized, document)
    }

    pub fn document_rel(&self, document_abs: &str) -> String {
        safe_relpath(document_abs, &self.root_normalized)
    }
}

pub fn resolve_workspace(root: &Path, backup: &BackupConfig) -> Result<WorkspacePaths> {
    let root = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .context("failed to resolve current directory")?
            .join(root)
    };
    if !root.is_dir() {
        anyhow::bail!("workspace root is not a directory: {}", root.display());
    }

    let root_normalized = join("", &path_to_string(&root));
    let root = PathBuf::from(&root_normalized);
    let backup_base = root.join(&backup.dir_name);

    Ok(WorkspacePaths {
        lock_file: backup_base.join(".session.lock"),
        audit_log: backup_base.join("audit.log"),
        root,
        root_normalized,
        backup_base,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unifies_separators() {
        assert_eq!(normalize(r"Pic\img.png"), "Pic/img.png");
        assert_eq!(normalize(r"D:\\notes\\Pic\\a.png"), "D:/notes/Pic/a.png");
        assert_eq!(normalize("a//b///c"), "a/b/c");
        assert_eq!(normalize("a/b/"), "a/b");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalize_keeps_roots() {
        assert_eq!(normalize(r"C:\"), "C:/");
        assert_eq!(normalize("C://"), "C:/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("//"), "/");
        assert_eq!(normalize("D:/notes/"), "D:/notes");
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            r"Pic\img.png",
            r"C:\",
            "C:/",
            "a//b\\\\c/",
            r"\\server\share\x.png",
            "/",
            "./Pic/../a.png",
            "%E7%99%BD%E7%A0%81/img.png",
            "x:",
            "",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn file_name_and_parent_handle_both_separators() {
        assert_eq!(file_name(r"Pic\sub\img.PNG"), "img.PNG");
        assert_eq!(file_name("img.png"), "img.png");
        assert_eq!(parent("/ws/notes/a.md"), "/ws/notes");
        assert_eq!(parent("/a.md"), "/");
        assert_eq!(parent("C:/a.md"), "C:/");
        assert_eq!(parent("a.md"), "");
    }

    #[test]
    fn join_folds_dot_segments() {
        assert_eq!(join("/ws/notes", "../Pic/img.png"), "/ws/Pic/img.png");
        assert_eq!(join("/ws/notes", "./img.png"), "/ws/notes/img.png");
        assert_eq!(join("/ws", "/other/img.png"), "/other/img.png");
        assert_eq!(join("/", "../../x.png"), "/x.png");
        assert_eq!(join("", "../x.png"), "../x.png");
    }

    #[test]
    fn relative_to_walks_up_and_down() {
        assert_eq!(
            relative_to("/ws/Pic/img.png", "/ws/notes").as_deref(),
            Some("../Pic/img.png")
        );
        assert_eq!(
            relative_to("/ws/Pic/img.png", "/ws").as_deref(),
            Some("Pic/img.png")
        );
        assert_eq!(relative_to("/ws", "/ws").as_deref(), Some("."));
        assert_eq!(
            relative_to(r"d:\notes\Pic\a.png", "D:/notes/sub").as_deref(),
            Some("../Pic/a.png")
        );
    }

    #[test]
    fn safe_relpath_falls_back_across_drives() {
        assert_eq!(relative_to("E:/img/a.png", "D:/notes"), None);
        assert_eq!(safe_relpath(r"E:\img\a.png", "D:/notes"), "E:/img/a.png");
        assert_eq!(safe_relpath("rel/a.png", "/ws"), "rel/a.png");
    }
}
