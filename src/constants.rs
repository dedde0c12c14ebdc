//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Every runtime knob can be overridden from the environment (or `.env`).

use std::path::PathBuf;
use std::time::Duration;

/// App name (also the data directory name)
pub const APP_NAME: &str = "XMLGuard";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Encrypted configuration envelope file name
pub const ENVELOPE_FILE: &str = "secure_config.enc";

/// Deployment info file name (tenant identity for this install)
pub const DEPLOYMENT_INFO_FILE: &str = "deployment_info.json";

/// Persisted fallback machine id file name
pub const MACHINE_ID_FILE: &str = "machine_id";

/// Template directory name under the app data dir
pub const TEMPLATES_DIR: &str = "templates";

/// Audit log directory name under the app data dir
pub const AUDIT_DIR: &str = "audit_logs";

/// Default settle window after the last event on a path (milliseconds)
pub const DEFAULT_SETTLE_MS: u64 = 1000;

/// Default bounded event queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default notification timeout (seconds)
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;

/// Default envelope validity (days)
pub const DEFAULT_ENVELOPE_VALIDITY_DAYS: i64 = 365;

/// Default number of events printed by `audit`
pub const DEFAULT_AUDIT_LIMIT: usize = 20;

/// Telegram Bot API base URL
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

// Environment variable names
pub const ENV_BOT_TOKEN: &str = "XML_GUARD_BOT_TOKEN";
pub const ENV_CHAT_ID: &str = "XML_GUARD_CHAT_ID";
pub const ENV_ADMIN_IDS: &str = "XML_GUARD_ADMIN_IDS";
pub const ENV_COMPANY_MST: &str = "XML_GUARD_COMPANY_MST";
pub const ENV_COMPANY_NAME: &str = "XML_GUARD_COMPANY_NAME";
pub const ENV_WATCH_ROOTS: &str = "XML_GUARD_WATCH_ROOTS";
pub const ENV_DATA_DIR: &str = "XML_GUARD_DATA_DIR";
pub const ENV_SETTLE_MS: &str = "XML_GUARD_SETTLE_MS";
pub const ENV_WORKERS: &str = "XML_GUARD_WORKERS";
pub const ENV_KDF_SALT: &str = "XML_GUARD_KDF_SALT";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// App data directory: `$XML_GUARD_DATA_DIR`, else `<local data dir>/XMLGuard`
pub fn get_data_dir() -> PathBuf {
    std::env::var_os(ENV_DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME)
        })
}

/// Settle window from environment or default
pub fn get_settle_window() -> Duration {
    let ms = std::env::var(ENV_SETTLE_MS)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SETTLE_MS);
    Duration::from_millis(ms)
}

/// Worker count from environment, else number of cores
pub fn get_worker_count() -> usize {
    std::env::var(ENV_WORKERS)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &usize| *n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
}

/// Per-deployment key derivation salt, if one is set
pub fn get_kdf_salt() -> Option<Vec<u8>> {
    std::env::var(ENV_KDF_SALT)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(String::into_bytes)
}

/// Watched roots from environment (OS path-list syntax), else platform default
pub fn get_watch_roots() -> Vec<PathBuf> {
    if let Some(raw) = std::env::var_os(ENV_WATCH_ROOTS) {
        let roots: Vec<PathBuf> = std::env::split_paths(&raw)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if !roots.is_empty() {
            return roots;
        }
    }
    default_watch_roots()
}

/// Every existing drive root on Windows
#[cfg(windows)]
pub fn default_watch_roots() -> Vec<PathBuf> {
    (b'C'..=b'Z')
        .map(|letter| PathBuf::from(format!("{}:\\", letter as char)))
        .filter(|p| p.exists())
        .collect()
}

/// The user's home directory elsewhere
#[cfg(not(windows))]
pub fn default_watch_roots() -> Vec<PathBuf> {
    dirs::home_dir().into_iter().collect()
}
