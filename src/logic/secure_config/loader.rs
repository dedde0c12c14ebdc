//! Startup Config Resolution
//!
//! Envelope first, environment second. Either source yields a
//! `ProtectorConfig`; no source at all is `ConfigError::Unavailable`.

use std::fs;
use std::path::Path;

use super::envelope::SecureConfigStore;
use super::types::{
    ConfigError, ConfigSource, DeploymentInfo, ProtectorConfig, TelegramSettings, TenantIdentity,
};
use crate::constants::{ENV_ADMIN_IDS, ENV_BOT_TOKEN, ENV_CHAT_ID, ENV_COMPANY_MST, ENV_COMPANY_NAME};

/// Config plus where it came from
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: ProtectorConfig,
    pub source: ConfigSource,
}

/// Load the envelope for `tenant`, falling back to the environment
pub fn resolve_config(
    store: &SecureConfigStore,
    envelope_path: &Path,
    tenant: Option<&TenantIdentity>,
) -> Result<ResolvedConfig, ConfigError> {
    resolve_config_with(store, envelope_path, tenant, |key| std::env::var(key).ok())
}

/// Same as `resolve_config` with an injectable variable lookup
pub fn resolve_config_with<F>(
    store: &SecureConfigStore,
    envelope_path: &Path,
    tenant: Option<&TenantIdentity>,
    lookup: F,
) -> Result<ResolvedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let envelope_error = match tenant {
        Some(tenant) => match load_envelope_config(store, envelope_path, tenant) {
            Ok(config) => {
                log::info!("Loaded secure config for company: {}", tenant.name);
                return Ok(ResolvedConfig {
                    config,
                    source: ConfigSource::Envelope,
                });
            }
            Err(e) => {
                log::warn!("Secure config unusable: {}", e);
                e.to_string()
            }
        },
        None => "no tenant identity available".to_string(),
    };

    match config_from_env(lookup) {
        Ok(config) => {
            log::info!("Using environment fallback configuration");
            Ok(ResolvedConfig {
                config,
                source: ConfigSource::Environment,
            })
        }
        Err(env_error) => Err(ConfigError::Unavailable {
            envelope_error,
            env_error,
        }),
    }
}

fn load_envelope_config(
    store: &SecureConfigStore,
    path: &Path,
    tenant: &TenantIdentity,
) -> Result<ProtectorConfig, ConfigError> {
    let value = store.load(path, tenant)?;
    serde_json::from_value(value).map_err(|e| ConfigError::corrupt(format!("payload schema: {}", e)))
}

/// Build a config from the three fallback variables
pub fn config_from_env<F>(lookup: F) -> Result<ProtectorConfig, String>
where
    F: Fn(&str) -> Option<String>,
{
    let bot_token = lookup(ENV_BOT_TOKEN).filter(|v| !v.trim().is_empty());
    let chat_id = lookup(ENV_CHAT_ID).filter(|v| !v.trim().is_empty());

    let (bot_token, chat_id) = match (bot_token, chat_id) {
        (Some(token), Some(chat)) => (token.trim().to_string(), chat.trim().to_string()),
        _ => return Err(format!("{} and {} must both be set", ENV_BOT_TOKEN, ENV_CHAT_ID)),
    };

    let admin_ids = lookup(ENV_ADMIN_IDS)
        .map(|raw| parse_admin_ids(&raw))
        .unwrap_or_default();

    let mut config = ProtectorConfig {
        telegram: TelegramSettings {
            bot_token,
            chat_id,
            admin_ids,
        },
        ..ProtectorConfig::default()
    };
    config.company_info.mst = lookup(ENV_COMPANY_MST).unwrap_or_default();
    config.company_info.name = lookup(ENV_COMPANY_NAME).unwrap_or_default();

    Ok(config)
}

/// Comma separated ids; entries that are not integers are skipped
pub fn parse_admin_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                log::warn!("Ignoring invalid admin id: {}", s);
                None
            }
        })
        .collect()
}

// ============================================================================
// TENANT RESOLUTION
// ============================================================================

/// Read `deployment_info.json`
pub fn load_deployment_info(path: &Path) -> Option<DeploymentInfo> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(info) => Some(info),
        Err(e) => {
            log::warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

/// Write `deployment_info.json`
pub fn save_deployment_info(path: &Path, info: &DeploymentInfo) -> Result<(), ConfigError> {
    let io_err = |source: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(info).map_err(|e| ConfigError::corrupt(e.to_string()))?;
    fs::write(path, json).map_err(io_err)
}

/// Explicit tenant, then deployment info, then environment
pub fn resolve_tenant<F>(
    explicit: Option<TenantIdentity>,
    deployment_file: &Path,
    lookup: F,
) -> Option<TenantIdentity>
where
    F: Fn(&str) -> Option<String>,
{
    if explicit.is_some() {
        return explicit;
    }
    if let Some(info) = load_deployment_info(deployment_file) {
        return Some(info.tenant());
    }
    match (lookup(ENV_COMPANY_MST), lookup(ENV_COMPANY_NAME)) {
        (Some(mst), name) if !mst.trim().is_empty() => {
            Some(TenantIdentity::new(mst.trim(), name.unwrap_or_default().trim()))
        }
        _ => None,
    }
}
