use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::constants::{DEFAULT_AUDIT_LIMIT, ENV_ADMIN_IDS, ENV_BOT_TOKEN, ENV_CHAT_ID};
use crate::logic::response::AlertSeverity;

#[derive(Parser, Debug)]
#[command(name = "xml-guard", version, about = "Tax declaration XML protection service")]
pub struct Cli {
    #[arg(long, global = true, help = "App data directory (default: <local data dir>/XMLGuard)")]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the protection service
    Run(RunArgs),
    /// Encrypt a notification config for a tenant into the envelope file
    Seal(SealArgs),
    /// Decrypt the envelope and print a redacted summary
    Open(TenantArgs),
    /// Print this host's machine fingerprint
    Fingerprint,
    /// Print the canonical fields of an XML file
    Inspect { file: PathBuf },
    /// List the template index
    Templates {
        #[arg(long, help = "Template directory (default: <data dir>/templates)")]
        templates: Option<PathBuf>,
        #[arg(long, default_value_t = false, help = "Fail on duplicate tax ids")]
        strict_templates: bool,
    },
    /// Print the most recent audit trail events
    Audit(AuditArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct TenantArgs {
    #[arg(long, help = "Company tax id (MST)")]
    pub tax_id: Option<String>,
    #[arg(long, help = "Company name")]
    pub name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub tenant: TenantArgs,
    #[arg(long, help = "Template directory (default: <data dir>/templates)")]
    pub templates: Option<PathBuf>,
    #[arg(long = "watch", help = "Root to watch recursively (repeatable)")]
    pub watch: Vec<PathBuf>,
    #[arg(long, help = "Settle window in milliseconds")]
    pub settle_ms: Option<u64>,
    #[arg(long, help = "Concurrent evaluation workers")]
    pub workers: Option<usize>,
    #[arg(long, default_value_t = false, help = "Run without any notification config")]
    pub no_notify: bool,
    #[arg(long, default_value_t = false, help = "Fail on duplicate tax ids")]
    pub strict_templates: bool,
    #[arg(long, help = "Lowest severity sent to Telegram (info, low, medium, high, critical)")]
    pub min_severity: Option<AlertSeverity>,
}

#[derive(Args, Debug, Clone)]
pub struct AuditArgs {
    #[arg(long, default_value_t = DEFAULT_AUDIT_LIMIT, help = "Number of events to print")]
    pub limit: usize,
    #[arg(long, default_value = "info", help = "Lowest severity to print")]
    pub min_severity: AlertSeverity,
}

impl Default for AuditArgs {
    fn default() -> Self {
        Self {
            limit: DEFAULT_AUDIT_LIMIT,
            min_severity: AlertSeverity::Info,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SealArgs {
    #[arg(long, help = "Company tax id (MST)")]
    pub tax_id: String,
    #[arg(long, help = "Company name")]
    pub name: String,
    #[arg(long, help = "JSON payload file (default: built from the flags below)")]
    pub payload: Option<PathBuf>,
    #[arg(long, env = ENV_BOT_TOKEN, hide_env_values = true)]
    pub bot_token: Option<String>,
    #[arg(long, env = ENV_CHAT_ID)]
    pub chat_id: Option<String>,
    #[arg(long, env = ENV_ADMIN_IDS, help = "Comma separated admin ids")]
    pub admin_ids: Option<String>,
    #[arg(long, help = "Envelope validity in days")]
    pub validity_days: Option<i64>,
}
