//! Secure Config Types

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::logic::identity::MachineFingerprint;

// ============================================================================
// TENANT
// ============================================================================

/// The protected entity a deployment is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantIdentity {
    pub tax_id: String,
    pub name: String,
}

impl TenantIdentity {
    pub fn new(tax_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tax_id: tax_id.into(),
            name: name.into(),
        }
    }
}

/// Contents of `deployment_info.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub company_mst: String,
    pub company_name: String,
    pub deployment_id: String,
    pub created_at: DateTime<Utc>,
}

impl DeploymentInfo {
    pub fn new(tenant: &TenantIdentity) -> Self {
        Self {
            company_mst: tenant.tax_id.clone(),
            company_name: tenant.name.clone(),
            deployment_id: new_deployment_id(),
            created_at: Utc::now(),
        }
    }

    pub fn tenant(&self) -> TenantIdentity {
        TenantIdentity::new(&self.company_mst, &self.company_name)
    }
}

/// Short upper-case deployment id
pub fn new_deployment_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

// ============================================================================
// PAYLOAD SCHEMA
// ============================================================================

/// Runtime view of the envelope payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectorConfig {
    pub telegram: TelegramSettings,
    pub company_info: CompanyInfo,
    pub xml_protection: XmlProtectionSettings,
    pub security_settings: SecuritySettings,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
    pub admin_ids: Vec<i64>,
}

impl TelegramSettings {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }

    /// Salted hash that identifies the token without revealing it
    pub fn token_hash(&self, fingerprint: &MachineFingerprint) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}-{}", self.bot_token, fingerprint).as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("admin_ids", &self.admin_ids)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyInfo {
    pub mst: String,
    pub name: String,
    pub deployment_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XmlProtectionSettings {
    pub monitor_all_drives: bool,
    pub auto_backup: bool,
}

impl Default for XmlProtectionSettings {
    fn default() -> Self {
        Self {
            monitor_all_drives: true,
            auto_backup: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub audit_logging: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self { audit_logging: true }
    }
}

/// Where the active config was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Envelope,
    Environment,
}

// ============================================================================
// ERRORS
// ============================================================================

/// Config errors. All envelope errors are terminal for that envelope.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config envelope not found: {path}")]
    NotFound { path: PathBuf },

    #[error("config envelope expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("config envelope bound to machine {envelope}, this machine is {local}")]
    MachineMismatch {
        envelope: MachineFingerprint,
        local: MachineFingerprint,
    },

    #[error("config envelope corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("config encryption failed")]
    Encryption,

    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable configuration source (envelope: {envelope_error}; environment: {env_error})")]
    Unavailable {
        envelope_error: String,
        env_error: String,
    },
}

impl ConfigError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults_fill_missing_sections() {
        let cfg: ProtectorConfig =
            serde_json::from_str(r#"{"telegram": {"bot_token": "t", "chat_id": "-1"}}"#).unwrap();
        assert!(cfg.telegram.is_configured());
        assert!(cfg.telegram.admin_ids.is_empty());
        assert!(cfg.xml_protection.auto_backup);
        assert!(cfg.security_settings.audit_logging);
    }

    #[test]
    fn test_debug_hides_token() {
        let t = TelegramSettings {
            bot_token: "123:SECRET".into(),
            chat_id: "-1".into(),
            admin_ids: vec![1],
        };
        assert!(!format!("{:?}", t).contains("SECRET"));
    }

    #[test]
    fn test_token_hash_is_machine_salted() {
        let t = TelegramSettings {
            bot_token: "123:SECRET".into(),
            ..TelegramSettings::default()
        };
        let a = t.token_hash(&MachineFingerprint::new("AAAA"));
        let b = t.token_hash(&MachineFingerprint::new("BBBB"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_deployment_info_tenant() {
        let info = DeploymentInfo::new(&TenantIdentity::new("0123456789", "ABC"));
        assert_eq!(info.deployment_id.len(), 8);
        assert_eq!(info.tenant(), TenantIdentity::new("0123456789", "ABC"));
    }
}
