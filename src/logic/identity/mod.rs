//! Machine Identity Module
//!
//! Provides the host-bound fingerprint that secure config envelopes are tied to.
//!
//! Features:
//! - Hardware-derived fingerprint (host name, OS, primary MAC), hashed
//! - Persisted random fallback when no hardware id is available

pub mod hwid;
pub mod storage;

pub use hwid::{collect_host_facts, HostFacts};
pub use storage::FallbackIdStore;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Opaque host fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineFingerprint(String);

impl MachineFingerprint {
    #[cfg(test)]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for MachineFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the fingerprint came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintSource {
    Hardware,
    PersistedFallback,
}

/// Identity errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("cannot persist fallback machine id at {path}: {source}")]
    FallbackIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fallback machine id file {path} is corrupt")]
    InvalidFallbackId { path: PathBuf },
}

/// Resolved identity of this host
#[derive(Debug, Clone)]
pub struct MachineIdentity {
    fingerprint: MachineFingerprint,
    source: FingerprintSource,
}

impl MachineIdentity {
    /// Resolve the identity of the running host.
    ///
    /// `fallback_file` is only touched when no hardware identifier exists.
    pub fn resolve(fallback_file: &Path) -> Result<Self, IdentityError> {
        Self::from_facts(&collect_host_facts(), &FallbackIdStore::new(fallback_file))
    }

    /// Resolve from already collected facts
    pub fn from_facts(facts: &HostFacts, fallback: &FallbackIdStore) -> Result<Self, IdentityError> {
        let identity = if facts.has_hardware_id() {
            Self {
                fingerprint: MachineFingerprint(facts.compute_fingerprint()),
                source: FingerprintSource::Hardware,
            }
        } else {
            Self {
                fingerprint: MachineFingerprint(fallback.load_or_create()?),
                source: FingerprintSource::PersistedFallback,
            }
        };

        log::info!(
            "Machine fingerprint: {} ({:?})",
            identity.fingerprint,
            identity.source
        );
        Ok(identity)
    }

    pub fn fingerprint(&self) -> &MachineFingerprint {
        &self.fingerprint
    }

    pub fn source(&self) -> FingerprintSource {
        self.source
    }
}
