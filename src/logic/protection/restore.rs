//! Backup + Restore
//!
//! Two ordered steps: copy the candidate aside, then overwrite it with the
//! template's canonical bytes. The overwrite never starts if the backup failed.

use std::fs;
use std::path::{Path, PathBuf};

use super::types::ProtectionError;

/// `<path>.backup.<unix_ts>`, with `_<n>` appended if that name is taken
pub fn backup_path_for(path: &Path, unix_ts: i64) -> PathBuf {
    let mut base = path.as_os_str().to_os_string();
    base.push(format!(".backup.{}", unix_ts));
    let candidate = PathBuf::from(&base);
    if !candidate.exists() {
        return candidate;
    }

    let mut n = 1u32;
    loop {
        let mut name = base.clone();
        name.push(format!("_{}", n));
        let next = PathBuf::from(name);
        if !next.exists() {
            return next;
        }
        n += 1;
    }
}

/// Back up `path`, then overwrite it with `content`. Returns the backup path.
pub fn backup_and_restore(path: &Path, content: &[u8]) -> Result<PathBuf, ProtectionError> {
    let backup = backup_path_for(path, chrono::Utc::now().timestamp());

    fs::copy(path, &backup).map_err(|source| ProtectionError::BackupFailed {
        path: path.to_path_buf(),
        backup: backup.clone(),
        source,
    })?;
    log::debug!("Backed up {} to {}", path.display(), backup.display());

    fs::write(path, content).map_err(|source| ProtectionError::WriteFailed {
        path: path.to_path_buf(),
        backup: backup.clone(),
        source,
    })?;

    log::info!(
        "Restored {} from template (backup: {})",
        path.display(),
        backup.display()
    );
    Ok(backup)
}
