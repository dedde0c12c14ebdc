//! Secure Config Module
//!
//! Tenant-and-machine bound configuration envelopes.
//!
//! ## Structure
//! - `kdf.rs` - PBKDF2 key derivation bound to (tax id, name, fingerprint)
//! - `envelope.rs` - AES-256-GCM envelopes, file load/save
//! - `types.rs` - tenant identity, payload schema, errors
//! - `loader.rs` - startup resolution (envelope, then environment)

pub mod envelope;
pub mod kdf;
pub mod loader;
pub mod types;

pub use envelope::SecureConfigStore;
pub use kdf::KeyDeriver;
pub use loader::{resolve_config, resolve_tenant, save_deployment_info};
pub use types::{DeploymentInfo, ProtectorConfig, TelegramSettings, TenantIdentity};
