//! Fallback Machine ID Storage
//!
//! When no hardware identifier is available the fingerprint falls back to a
//! random id. That id is only usable if it survives restarts, so it is written
//! to disk on first generation and any failure to persist it is an error.

use std::fs;
use std::io;
use std::path::PathBuf;

use uuid::Uuid;

use super::hwid::FINGERPRINT_LEN;
use super::IdentityError;

/// Persisted fallback id store
pub struct FallbackIdStore {
    file_path: PathBuf,
}

impl FallbackIdStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    /// Check if a fallback id was already generated
    #[cfg(test)]
    pub fn exists(&self) -> bool {
        self.file_path.exists()
    }

    /// Load the persisted id, or generate and persist a new one
    pub fn load_or_create(&self) -> Result<String, IdentityError> {
        match fs::read_to_string(&self.file_path) {
            Ok(content) => {
                let id = content.trim().to_string();
                if is_valid_id(&id) {
                    return Ok(id);
                }
                Err(IdentityError::InvalidFallbackId {
                    path: self.file_path.clone(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.create(),
            Err(source) => Err(IdentityError::FallbackIo {
                path: self.file_path.clone(),
                source,
            }),
        }
    }

    fn create(&self) -> Result<String, IdentityError> {
        let id = Uuid::new_v4().simple().to_string()[..FINGERPRINT_LEN].to_uppercase();

        let persist = || -> io::Result<()> {
            if let Some(parent) = self.file_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.file_path, &id)?;
            // Read back: an id we cannot reload is as bad as none.
            let stored = fs::read_to_string(&self.file_path)?;
            if stored.trim() != id {
                return Err(io::Error::new(io::ErrorKind::Other, "fallback id readback mismatch"));
            }
            Ok(())
        };

        persist().map_err(|source| IdentityError::FallbackIo {
            path: self.file_path.clone(),
            source,
        })?;

        log::warn!(
            "No hardware identifier available; generated fallback machine id at {}",
            self.file_path.display()
        );
        Ok(id)
    }
}

fn is_valid_id(id: &str) -> bool {
    id.len() == FINGERPRINT_LEN && id.chars().all(|c| c.is_ascii_hexdigit())
}
