use crate::error::FixerError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

include!(concat!(env!("OUT_DIR"), "/mdimg_env_allowlist.rs"));

/// Lowest confidence bar a fuzzy match may be accepted at. Config may
/// raise the bar, never lower it.
pub const MIN_ACCEPT_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub dir_name: String,
    pub session_prefix: String,
    pub journal_file: String,
    pub undo_plan_file: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir_name: ".backup".to_string(),
            session_prefix: "smart_fix_".to_string(),
            journal_file: "fix_log.json".to_string(),
            undo_plan_file: "undo_plan.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub filename_floor: f64,
    pub accept_threshold: f64,
    pub filename_weight: f64,
    pub containment_length_ratio: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            filename_floor: 0.95,
            accept_threshold: MIN_ACCEPT_THRESHOLD,
            filename_weight: 0.8,
            containment_length_ratio: 0.8,
        }
    }
}

impl MatchingConfig {
    pub fn path_weight(&self) -> f64 {
        1.0 - self.filename_weight
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FixerConfig {
    pub backup: BackupConfig,
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialFixerConfig {
    backup: Option<BackupConfig>,
    matching: Option<MatchingConfig>,
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    FixerError::InvalidConfig(message.into()).into()
}

pub fn validate(cfg: &FixerConfig) -> Result<()> {
    let m = &cfg.matching;
    if !(m.accept_threshold >= MIN_ACCEPT_THRESHOLD && m.accept_threshold < 1.0) {
        return Err(invalid(format!(
            "accept threshold must be in [{MIN_ACCEPT_THRESHOLD}, 1.0), got {}",
            m.accept_threshold
        )));
    }
    if !(m.filename_floor > 0.0 && m.filename_floor <= 1.0) {
        return Err(invalid("filename floor must be in (0, 1.0]"));
    }
    if !(0.0..=1.0).contains(&m.filename_weight) {
        return Err(invalid("filename weight must be in [0, 1.0]"));
    }
    if !(m.containment_length_ratio > 0.0 && m.containment_length_ratio <= 1.0) {
        return Err(invalid("containment length ratio must be in (0, 1.0]"));
    }

    let b = &cfg.backup;
    for (name, value) in [
        ("backup dir name", &b.dir_name),
        ("session prefix", &b.session_prefix),
        ("journal file", &b.journal_file),
        ("undo plan file", &b.undo_plan_file),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(format!("{name} cannot be empty")));
        }
        if value.contains('/') || value.contains('\\') {
            return Err(invalid(format!("{name} must be a single path component")));
        }
    }
    if b.journal_file == b.undo_plan_file {
        return Err(invalid("journal file and undo plan file must differ"));
    }
    Ok(())
}

fn resolve_config_path(workspace: &Path) -> Option<PathBuf> {
    if let Ok(custom) = env::var("MDIMG_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let local = workspace.join(".mdimg.toml");
    if local.exists() {
        return Some(local);
    }

    let home = dirs::home_dir()?;
    Some(home.join(".mdimg").join("config.toml"))
}

fn merge_file_config(base: &mut FixerConfig, workspace: &Path) -> Result<()> {
    let Some(path) = resolve_config_path(workspace) else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| invalid(format!("failed to read {}: {err}", path.display())))?;
    let parsed: PartialFixerConfig = toml::from_str(&raw)
        .map_err(|err| invalid(format!("failed to parse {}: {err}", path.display())))?;
    if let Some(backup) = parsed.backup {
        base.backup = backup;
    }
    if let Some(matching) = parsed.matching {
        base.matching = matching;
    }
    Ok(())
}

/// `MDIMG_*` variables set in the environment that nothing reads.
pub fn unknown_env_keys() -> Vec<String> {
    env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("MDIMG_"))
        .filter(|key| !GENERATED_MDIMG_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect()
}

pub fn load_config(workspace: &Path) -> Result<FixerConfig> {
    let mut cfg = FixerConfig::default();
    merge_file_config(&mut cfg, workspace)?;

    cfg.backup.dir_name = env_or_string("MDIMG_BACKUP_DIR_NAME", &cfg.backup.dir_name);
    cfg.backup.session_prefix =
        env_or_string("MDIMG_SESSION_PREFIX", &cfg.backup.session_prefix);
    cfg.matching.filename_floor =
        env_or_f64("MDIMG_FILENAME_FLOOR", cfg.matching.filename_floor);
    cfg.matching.accept_threshold =
        env_or_f64("MDIMG_ACCEPT_THRESHOLD", cfg.matching.accept_threshold);
    cfg.matching.filename_weight =
        env_or_f64("MDIMG_FILENAME_WEIGHT", cfg.matching.filename_weight);
    cfg.matching.containment_length_ratio = env_or_f64(
        "MDIMG_CONTAINMENT_RATIO",
        cfg.matching.containment_length_ratio,
    );

    for key in unknown_env_keys() {
        tracing::warn!(key = %key, "ignoring unrecognised MDIMG_ environment variable");
    }

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        validate(&FixerConfig::default()).expect("defaults are valid");
    }

    #[test]
    fn accept_threshold_cannot_drop_below_gate() {
        let mut cfg = FixerConfig::default();
        cfg.matching.accept_threshold = 0.85;
        let err = validate(&cfg).expect_err("must reject");
        assert!(format!("{err}").contains("accept threshold"));

        cfg.matching.accept_threshold = 0.95;
        validate(&cfg).expect("raising the bar is allowed");
    }

    #[test]
    fn backup_names_must_be_single_components() {
        let mut cfg = FixerConfig::default();
        cfg.backup.dir_name = "a/b".to_string();
        assert!(validate(&cfg).is_err());

        let mut cfg = FixerConfig::default();
        cfg.backup.session_prefix = "  ".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn partial_toml_overrides_one_section() {
        let raw = r#"
[matching]
filename_floor = 0.97
accept_threshold = 0.92
filename_weight = 0.7
containment_length_ratio = 0.85
"#;
        let parsed: PartialFixerConfig = toml::from_str(raw).expect("parse");
        assert!(parsed.backup.is_none());
        let matching = parsed.matching.expect("matching section");
        assert_eq!(matching.filename_floor, 0.97);
        assert!((matching.path_weight() - 0.3).abs() < 1e-9);
    }
}
