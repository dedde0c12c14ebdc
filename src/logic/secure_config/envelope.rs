//! Config Envelope Storage with AES-256-GCM
//!
//! File format: base64 of a JSON envelope
//! `{ciphertext, taxId, name, machineFingerprint, createdAt, expiresAt}`.
//! The metadata travels in the clear so a copied file can be reported as a
//! machine mismatch, but it is bound into the AEAD tag as associated data:
//! editing any field makes the envelope fail authentication.

use std::fs;
use std::io;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kdf::{Key256, KeyDeriver};
use super::types::{ConfigError, TenantIdentity};
use crate::constants::DEFAULT_ENVELOPE_VALIDITY_DAYS;
use crate::logic::identity::MachineFingerprint;

const NONCE_LEN: usize = 12;

/// Encrypted, metadata-tagged configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEnvelope {
    /// base64(nonce || AES-GCM ciphertext)
    pub ciphertext: String,
    pub tax_id: String,
    pub name: String,
    pub machine_fingerprint: MachineFingerprint,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ConfigEnvelope {
    fn associated_data(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}",
            self.tax_id,
            self.name,
            self.machine_fingerprint,
            self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.expires_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        )
        .into_bytes()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Encode for the envelope file
    pub fn encode(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_vec(self).map_err(|e| ConfigError::corrupt(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// Decode the envelope file contents
    pub fn decode(content: &str) -> Result<Self, ConfigError> {
        let bytes = BASE64
            .decode(content.trim())
            .map_err(|e| ConfigError::corrupt(format!("base64: {}", e)))?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::corrupt(format!("json: {}", e)))
    }
}

/// Produces and consumes config envelopes for the local machine
#[derive(Debug, Clone)]
pub struct SecureConfigStore {
    deriver: KeyDeriver,
    fingerprint: MachineFingerprint,
    validity: Duration,
}

impl SecureConfigStore {
    pub fn new(fingerprint: MachineFingerprint) -> Self {
        Self {
            deriver: KeyDeriver::default(),
            fingerprint,
            validity: Duration::days(DEFAULT_ENVELOPE_VALIDITY_DAYS),
        }
    }

    pub fn with_deriver(mut self, deriver: KeyDeriver) -> Self {
        self.deriver = deriver;
        self
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    fn key_for(&self, tax_id: &str, name: &str) -> Key256 {
        self.deriver.derive(tax_id, name, &self.fingerprint)
    }

    /// Encrypt `payload` for `tenant` on this machine
    pub fn encrypt(&self, payload: &Value, tenant: &TenantIdentity) -> Result<ConfigEnvelope, ConfigError> {
        self.encrypt_at(payload, tenant, Utc::now())
    }

    /// Encrypt with an explicit creation time
    pub fn encrypt_at(
        &self,
        payload: &Value,
        tenant: &TenantIdentity,
        created_at: DateTime<Utc>,
    ) -> Result<ConfigEnvelope, ConfigError> {
        let mut envelope = ConfigEnvelope {
            ciphertext: String::new(),
            tax_id: tenant.tax_id.clone(),
            name: tenant.name.clone(),
            machine_fingerprint: self.fingerprint.clone(),
            created_at,
            expires_at: created_at + self.validity,
        };

        let plaintext = serde_json::to_vec(payload).map_err(|_| ConfigError::Encryption)?;
        let key = self.key_for(&tenant.tax_id, &tenant.name);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let aad = envelope.associated_data();
        let sealed = cipher
            .encrypt(nonce, Payload { msg: &plaintext, aad: &aad })
            .map_err(|_| ConfigError::Encryption)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);
        envelope.ciphertext = BASE64.encode(blob);

        log::debug!(
            "Sealed config for tenant {} (expires {})",
            tenant.tax_id,
            envelope.expires_at
        );
        Ok(envelope)
    }

    /// Decrypt an envelope for `tenant` on this machine
    pub fn decrypt(&self, envelope: &ConfigEnvelope, tenant: &TenantIdentity) -> Result<Value, ConfigError> {
        self.decrypt_at(envelope, tenant, Utc::now())
    }

    /// Decrypt as of `now`.
    ///
    /// Order: machine binding, authentication, then expiry. Expiry is read
    /// only from authenticated metadata, so it cannot be extended by editing
    /// the file.
    pub fn decrypt_at(
        &self,
        envelope: &ConfigEnvelope,
        tenant: &TenantIdentity,
        now: DateTime<Utc>,
    ) -> Result<Value, ConfigError> {
        if envelope.machine_fingerprint != self.fingerprint {
            return Err(ConfigError::MachineMismatch {
                envelope: envelope.machine_fingerprint.clone(),
                local: self.fingerprint.clone(),
            });
        }

        let blob = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| ConfigError::corrupt(format!("ciphertext base64: {}", e)))?;
        if blob.len() <= NONCE_LEN {
            return Err(ConfigError::corrupt("ciphertext too short"));
        }
        let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);

        let key = self.key_for(&tenant.tax_id, &tenant.name);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let aad = envelope.associated_data();
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: sealed, aad: &aad })
            .map_err(|_| ConfigError::corrupt("authentication failed"))?;

        if envelope.is_expired_at(now) {
            return Err(ConfigError::Expired {
                expired_at: envelope.expires_at,
            });
        }

        serde_json::from_slice(&plaintext).map_err(|e| ConfigError::corrupt(format!("payload: {}", e)))
    }

    /// Write an envelope to its file
    pub fn save(&self, path: &Path, envelope: &ConfigEnvelope) -> Result<(), ConfigError> {
        let encoded = envelope.encode()?;
        let io_err = |source: io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, encoded).map_err(io_err)?;

        log::info!("Config envelope saved: {}", path.display());
        Ok(())
    }

    /// Read an envelope file without decrypting it
    pub fn read_envelope(path: &Path) -> Result<ConfigEnvelope, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        ConfigEnvelope::decode(&content)
    }

    /// Read and decrypt the envelope file
    pub fn load(&self, path: &Path, tenant: &TenantIdentity) -> Result<Value, ConfigError> {
        let envelope = Self::read_envelope(path)?;
        self.decrypt(&envelope, tenant)
    }
}
