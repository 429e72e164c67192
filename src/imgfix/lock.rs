use crate::error::FixerError;
use crate::imgfix::paths::WorkspacePaths;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;

/// Exclusive per-workspace lock held for the lifetime of a repair or undo
/// session. Released on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
}

impl SessionLock {
    pub fn acquire(paths: &WorkspacePaths) -> Result<Self> {
        fs::create_dir_all(&paths.backup_base)
            .with_context(|| format!("failed to create {}", paths.backup_base.display()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&paths.lock_file)
            .with_context(|| format!("failed to open {}", paths.lock_file.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(FixerError::SessionLocked(paths.lock_file.clone()).into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
