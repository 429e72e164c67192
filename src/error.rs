use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixerError {
    #[error("journal write failed for {path}; documents were already rewritten, undo record lost: {reason}")]
    JournalWrite { path: PathBuf, reason: String },
    #[error("another repair session holds the workspace lock: {0}")]
    SessionLocked(PathBuf),
    #[error("config invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("manifest invalid or unreadable: {0}")]
    InvalidManifest(String),
    #[error("no backup sessions found under {0}")]
    NoBackupSessions(PathBuf),
}

impl FixerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::JournalWrite { .. } => ErrorCode::E002JournalWrite,
            Self::SessionLocked(_) => ErrorCode::E001Locked,
            Self::InvalidConfig(_) => ErrorCode::E005ConfigInvalid,
            Self::InvalidManifest(_) => ErrorCode::E006ManifestInvalid,
            Self::NoBackupSessions(_) => ErrorCode::E007SnapshotMissing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    E001Locked,
    E002JournalWrite,
    E003SnapshotFailed,
    E004DocumentIo,
    E005ConfigInvalid,
    E006ManifestInvalid,
    E007SnapshotMissing,
    E008SnapshotCorrupt,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002JournalWrite => "E002_JOURNAL_WRITE",
            Self::E003SnapshotFailed => "E003_SNAPSHOT_FAILED",
            Self::E004DocumentIo => "E004_DOCUMENT_IO",
            Self::E005ConfigInvalid => "E005_CONFIG_INVALID",
            Self::E006ManifestInvalid => "E006_MANIFEST_INVALID",
            Self::E007SnapshotMissing => "E007_SNAPSHOT_MISSING",
            Self::E008SnapshotCorrupt => "E008_SNAPSHOT_CORRUPT",
        }
    }
}
