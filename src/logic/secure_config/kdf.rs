//! Tenant-and-machine bound key derivation
//!
//! PBKDF2-HMAC-SHA256 over `taxId-name-fingerprint`.

use std::fmt;

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::logic::identity::MachineFingerprint;

/// Application-wide salt shared by every tenant
pub const DEFAULT_SALT: &[u8] = b"xml_protector_salt_2025";

/// Minimum accepted PBKDF2 iteration count
pub const MIN_ITERATIONS: u32 = 100_000;

/// 256-bit symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct Key256([u8; 32]);

impl Key256 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Key256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key256(<redacted>)")
    }
}

/// Deterministic key deriver
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    salt: Vec<u8>,
    iterations: u32,
}

impl KeyDeriver {
    /// Custom salt; iteration counts below `MIN_ITERATIONS` are raised to it
    pub fn new(salt: impl Into<Vec<u8>>, iterations: u32) -> Self {
        Self {
            salt: salt.into(),
            iterations: iterations.max(MIN_ITERATIONS),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Derive the key for a (tax id, name, fingerprint) triple
    pub fn derive(&self, tax_id: &str, name: &str, fingerprint: &MachineFingerprint) -> Key256 {
        let material = format!("{}-{}-{}", tax_id, name, fingerprint);
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(material.as_bytes(), &self.salt, self.iterations, &mut key);
        Key256(key)
    }
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(DEFAULT_SALT, MIN_ITERATIONS)
    }
}
