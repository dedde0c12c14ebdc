//! Operator Commands
//!
//! One function per CLI subcommand. Reports are plain serializable structs;
//! `main` prints them as JSON.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::cli::{AuditArgs, RunArgs, SealArgs, TenantArgs};
use crate::constants::{
    get_kdf_salt, get_settle_window, get_watch_roots, get_worker_count, AUDIT_DIR,
    DEFAULT_NOTIFY_TIMEOUT_SECS, DEFAULT_QUEUE_CAPACITY, DEPLOYMENT_INFO_FILE, ENVELOPE_FILE,
    MACHINE_ID_FILE, TEMPLATES_DIR,
};
use crate::logic::identity::MachineIdentity;
use crate::logic::protection::{EngineConfig, ProtectionEngine, RootWatchers, WatchEvent};
use crate::logic::response::{
    AlertDispatcher, AlertSeverity, EventKind, LogDispatcher, NotifyError, Notifier,
    StructuredEvent, TelegramDispatcher,
};
use crate::logic::secure_config::loader::parse_admin_ids;
use crate::logic::secure_config::{
    resolve_config, resolve_tenant, save_deployment_info, DeploymentInfo, KeyDeriver, ProtectorConfig,
    SecureConfigStore, TelegramSettings, TenantIdentity,
};
use crate::logic::secure_config::kdf::MIN_ITERATIONS;
use crate::logic::telemetry::{list_log_files, read_events, AuditTrail};
use crate::logic::templates::{
    extract_from_file, CanonicalFields, DuplicatePolicy, DuplicateTemplate, TemplateIndex,
};

// ============================================================================
// PATHS
// ============================================================================

/// Files under the app data directory
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub envelope: PathBuf,
    pub deployment_info: PathBuf,
    pub machine_id: PathBuf,
    pub templates: PathBuf,
    pub audit: PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            envelope: data_dir.join(ENVELOPE_FILE),
            deployment_info: data_dir.join(DEPLOYMENT_INFO_FILE),
            machine_id: data_dir.join(MACHINE_ID_FILE),
            templates: data_dir.join(TEMPLATES_DIR),
            audit: data_dir.join(AUDIT_DIR),
            data_dir,
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn explicit_tenant(args: &TenantArgs) -> Option<TenantIdentity> {
    args.tax_id
        .as_ref()
        .map(|tax_id| TenantIdentity::new(tax_id.trim(), args.name.clone().unwrap_or_default().trim()))
}

/// Envelope store for this machine. `XML_GUARD_KDF_SALT` replaces the
/// built-in salt; seal, open and run must all see the same value.
fn config_store(identity: &MachineIdentity) -> SecureConfigStore {
    config_store_with(identity, get_kdf_salt())
}

fn config_store_with(identity: &MachineIdentity, salt: Option<Vec<u8>>) -> SecureConfigStore {
    let store = SecureConfigStore::new(identity.fingerprint().clone());
    match salt {
        Some(salt) => {
            let deriver = KeyDeriver::new(salt, MIN_ITERATIONS);
            log::info!("Using deployment KDF salt ({} iterations)", deriver.iterations());
            store.with_deriver(deriver)
        }
        None => store,
    }
}

fn duplicate_policy(strict: bool) -> DuplicatePolicy {
    if strict {
        DuplicatePolicy::Reject
    } else {
        DuplicatePolicy::KeepFirst
    }
}

// ============================================================================
// FINGERPRINT / INSPECT / TEMPLATES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FingerprintReport {
    pub fingerprint: String,
    pub source: String,
}

pub fn fingerprint(paths: &AppPaths) -> Result<FingerprintReport> {
    let identity = MachineIdentity::resolve(&paths.machine_id).context("Failed to resolve machine identity")?;
    Ok(FingerprintReport {
        fingerprint: identity.fingerprint().to_string(),
        source: format!("{:?}", identity.source()),
    })
}

pub fn inspect(file: &Path) -> Result<CanonicalFields> {
    extract_from_file(file).with_context(|| format!("Failed to inspect {}", file.display()))
}

#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    pub tax_id: String,
    pub company_name: Option<String>,
    pub document_type: Option<String>,
    pub period: Option<String>,
    pub source_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct TemplatesReport {
    pub directory: PathBuf,
    pub templates: Vec<TemplateSummary>,
    pub duplicates: Vec<DuplicateTemplate>,
    pub skipped: Vec<PathBuf>,
}

pub fn list_templates(directory: &Path, strict: bool) -> Result<TemplatesReport> {
    let index = TemplateIndex::load_with_policy(directory, duplicate_policy(strict))
        .context("Failed to load templates")?;

    Ok(TemplatesReport {
        directory: directory.to_path_buf(),
        templates: index
            .templates()
            .iter()
            .map(|t| TemplateSummary {
                tax_id: t.tax_id().to_string(),
                company_name: t.fields.company_name.clone(),
                document_type: t.fields.document_type.clone(),
                period: t.fields.period.clone(),
                source_path: t.source_path.clone(),
            })
            .collect(),
        duplicates: index.duplicates().to_vec(),
        skipped: index.skipped().to_vec(),
    })
}

// ============================================================================
// SEAL / OPEN
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SealReport {
    pub envelope_path: PathBuf,
    pub deployment_info_path: PathBuf,
    pub deployment_id: String,
    pub machine_fingerprint: String,
    pub expires_at: DateTime<Utc>,
}

/// Encrypt a config for a tenant on this machine and record the deployment
pub fn seal(paths: &AppPaths, args: &SealArgs) -> Result<SealReport> {
    let tenant = TenantIdentity::new(args.tax_id.trim(), args.name.trim());
    if tenant.tax_id.is_empty() {
        bail!("Tax id must not be empty");
    }

    let info = DeploymentInfo::new(&tenant);
    let payload = match args.payload {
        Some(ref file) => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read payload {}", file.display()))?;
            serde_json::from_str::<serde_json::Value>(&content)
                .with_context(|| format!("Payload {} is not valid JSON", file.display()))?
        }
        None => serde_json::to_value(payload_from_args(args, &tenant, &info)?)
            .context("Failed to serialize payload")?,
    };

    let identity = MachineIdentity::resolve(&paths.machine_id).context("Failed to resolve machine identity")?;
    let mut store = config_store(&identity);
    if let Some(days) = args.validity_days {
        if days <= 0 {
            bail!("Validity must be at least one day");
        }
        store = store.with_validity(chrono::Duration::days(days));
    }

    let envelope = store
        .encrypt(&payload, &tenant)
        .context("Failed to encrypt config")?;
    store
        .save(&paths.envelope, &envelope)
        .context("Failed to write config envelope")?;
    save_deployment_info(&paths.deployment_info, &info).context("Failed to write deployment info")?;

    log::info!(
        "Sealed config for {} ({}) into {}",
        tenant.name,
        tenant.tax_id,
        paths.envelope.display()
    );

    Ok(SealReport {
        envelope_path: paths.envelope.clone(),
        deployment_info_path: paths.deployment_info.clone(),
        deployment_id: info.deployment_id,
        machine_fingerprint: identity.fingerprint().to_string(),
        expires_at: envelope.expires_at,
    })
}

fn payload_from_args(args: &SealArgs, tenant: &TenantIdentity, info: &DeploymentInfo) -> Result<ProtectorConfig> {
    let (Some(bot_token), Some(chat_id)) = (args.bot_token.as_ref(), args.chat_id.as_ref()) else {
        bail!("--bot-token and --chat-id are required when no --payload file is given");
    };

    let mut config = ProtectorConfig {
        telegram: TelegramSettings {
            bot_token: bot_token.trim().to_string(),
            chat_id: chat_id.trim().to_string(),
            admin_ids: args.admin_ids.as_deref().map(parse_admin_ids).unwrap_or_default(),
        },
        ..ProtectorConfig::default()
    };
    config.company_info.mst = tenant.tax_id.clone();
    config.company_info.name = tenant.name.clone();
    config.company_info.deployment_id = info.deployment_id.clone();
    Ok(config)
}

#[derive(Debug, Serialize)]
pub struct OpenReport {
    pub tax_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub chat_id: String,
    pub admin_ids: Vec<i64>,
    /// Salted hash; the token itself is never printed
    pub bot_token_hash: String,
    pub monitor_all_drives: bool,
    pub audit_logging: bool,
}

pub fn open(paths: &AppPaths, args: &TenantArgs) -> Result<OpenReport> {
    let tenant = resolve_tenant(explicit_tenant(args), &paths.deployment_info, env_lookup)
        .context("No tenant identity: pass --tax-id/--name or seal a config first")?;

    let identity = MachineIdentity::resolve(&paths.machine_id).context("Failed to resolve machine identity")?;
    let store = config_store(&identity);

    let envelope = SecureConfigStore::read_envelope(&paths.envelope)?;
    let value = store.decrypt(&envelope, &tenant)?;
    let config: ProtectorConfig =
        serde_json::from_value(value).context("Envelope payload does not match the config schema")?;

    Ok(OpenReport {
        tax_id: envelope.tax_id,
        name: envelope.name,
        created_at: envelope.created_at,
        expires_at: envelope.expires_at,
        chat_id: config.telegram.chat_id.clone(),
        admin_ids: config.telegram.admin_ids.clone(),
        bot_token_hash: config.telegram.token_hash(identity.fingerprint()),
        monitor_all_drives: config.xml_protection.monitor_all_drives,
        audit_logging: config.security_settings.audit_logging,
    })
}

// ============================================================================
// AUDIT
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    /// Newest last
    pub events: Vec<StructuredEvent>,
}

/// Most recent audit trail events across all rotated files
pub fn audit(paths: &AppPaths, args: &AuditArgs) -> Result<AuditReport> {
    let files = if paths.audit.is_dir() {
        list_log_files(&paths.audit)
            .with_context(|| format!("Failed to list {}", paths.audit.display()))?
    } else {
        Vec::new()
    };

    let mut events = Vec::new();
    for file in &files {
        let batch = read_events(file).with_context(|| format!("Failed to read {}", file.display()))?;
        events.extend(batch.into_iter().filter(|e| e.severity >= args.min_severity));
    }
    events.sort_by_key(|e| e.timestamp);
    let skip = events.len().saturating_sub(args.limit);
    events.drain(..skip);

    Ok(AuditReport {
        directory: paths.audit.clone(),
        files,
        events,
    })
}

// ============================================================================
// RUN
// ============================================================================

/// Start the protection service and run until Ctrl+C
pub async fn run(paths: &AppPaths, args: &RunArgs) -> Result<()> {
    let identity = MachineIdentity::resolve(&paths.machine_id).context("Failed to resolve machine identity")?;
    let tenant = resolve_tenant(explicit_tenant(&args.tenant), &paths.deployment_info, env_lookup);
    match tenant {
        Some(ref t) => log::info!("Tenant: {} ({})", t.name, t.tax_id),
        None => log::warn!("No tenant identity; only the environment fallback config can be used"),
    }

    let store = config_store(&identity);
    let config = match resolve_config(&store, &paths.envelope, tenant.as_ref()) {
        Ok(resolved) => {
            log::info!("Configuration source: {:?}", resolved.source);
            Some(resolved.config)
        }
        Err(e) if args.no_notify => {
            log::warn!("{} - running without notifications", e);
            None
        }
        Err(e) => {
            return Err(e).context("No usable configuration source (use --no-notify to run without alerts)")
        }
    };

    let dispatchers = build_dispatchers(paths, config.as_ref(), &identity, args.min_severity);
    let notifier = Arc::new(Notifier::start(dispatchers, DEFAULT_QUEUE_CAPACITY));

    let templates_dir = args.templates.clone().unwrap_or_else(|| paths.templates.clone());
    let index = TemplateIndex::load_with_policy(&templates_dir, duplicate_policy(args.strict_templates))
        .context("Failed to load templates")?;
    if index.is_empty() {
        bail!("No XML templates in {}; nothing to protect", templates_dir.display());
    }

    let roots = watch_roots(args, config.as_ref());
    if roots.is_empty() {
        bail!("No roots to watch");
    }

    let engine_config = EngineConfig {
        settle: args
            .settle_ms
            .map(Duration::from_millis)
            .unwrap_or_else(get_settle_window),
        workers: args.workers.filter(|n| *n > 0).unwrap_or_else(get_worker_count),
        queue_capacity: DEFAULT_QUEUE_CAPACITY,
        excluded: excluded_dirs(paths, &templates_dir),
    };
    let template_count = index.len();
    let engine = Arc::new(ProtectionEngine::new(index, notifier.clone(), engine_config));

    let (tx, rx) = mpsc::channel(engine.config().queue_capacity);
    let watchers = RootWatchers::start(&roots, tx).context("Failed to start file watchers")?;
    let handle = engine.start(rx);

    let (reload_tx, reload_rx) = mpsc::channel(64);
    let template_watcher = match RootWatchers::start(&[templates_dir.clone()], reload_tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            log::warn!("Template edits will need a restart: {}", e);
            None
        }
    };
    let reloader = tokio::spawn(reload_templates(
        engine.clone(),
        templates_dir.clone(),
        args.strict_templates,
        reload_rx,
    ));

    notifier.publish(
        StructuredEvent::new(
            EventKind::ServiceStarted,
            "XML Guard started",
            &format!(
                "Protecting {} templates across {} watched roots",
                template_count,
                watchers.root_count()
            ),
            AlertSeverity::Low,
        )
        .with_extra("fingerprint", identity.fingerprint().to_string()),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    log::info!("Shutdown requested");

    drop(watchers);
    drop(template_watcher);
    handle.shutdown().await;
    if let Err(e) = reloader.await {
        log::error!("Template reload task failed: {}", e);
    }

    let stats = engine.stats();
    log::info!(
        "Stats: {} events, {} evaluations, {} protected, {} ignored, {} failed",
        stats.events,
        stats.evaluations,
        stats.protected,
        stats.ignored,
        stats.failed
    );
    notifier.publish(
        StructuredEvent::new(
            EventKind::ServiceStopped,
            "XML Guard stopped",
            &format!("{} files protected this session", stats.protected),
            AlertSeverity::Low,
        )
        .with_extra("evaluations", stats.evaluations.to_string())
        .with_extra("failed", stats.failed.to_string()),
    );
    notifier.shutdown();

    let delivery = notifier.stats();
    log::info!(
        "Notifications: {} published, {} delivered, {} failed, {} dropped",
        delivery.published.load(Ordering::Relaxed),
        delivery.delivered.load(Ordering::Relaxed),
        delivery.failed.load(Ordering::Relaxed),
        delivery.dropped.load(Ordering::Relaxed)
    );
    Ok(())
}

/// Reload the template index once edits in its directory settle. A failed
/// or empty load keeps the current index.
async fn reload_templates(
    engine: Arc<ProtectionEngine>,
    directory: PathBuf,
    strict: bool,
    mut changes: mpsc::Receiver<WatchEvent>,
) {
    let settle = engine.config().settle;

    while changes.recv().await.is_some() {
        loop {
            match tokio::time::timeout(settle, changes.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let dir = directory.clone();
        let loaded =
            tokio::task::spawn_blocking(move || TemplateIndex::load_with_policy(&dir, duplicate_policy(strict)))
                .await;
        match loaded {
            Ok(Ok(index)) if index.is_empty() => {
                log::warn!("{} has no templates now; keeping the current index", directory.display())
            }
            Ok(Ok(index)) => engine.replace_templates(index),
            Ok(Err(e)) => log::warn!("Template reload failed: {} - keeping the current index", e),
            Err(e) => log::error!("Template reload panicked: {}", e),
        }
    }
}

fn build_dispatchers(
    paths: &AppPaths,
    config: Option<&ProtectorConfig>,
    identity: &MachineIdentity,
    min_severity: Option<AlertSeverity>,
) -> Vec<Arc<dyn AlertDispatcher>> {
    let mut dispatchers: Vec<Arc<dyn AlertDispatcher>> = vec![Arc::new(LogDispatcher)];

    let audit_enabled = config.map_or(true, |c| c.security_settings.audit_logging);
    if audit_enabled {
        match AuditTrail::new(&paths.audit) {
            Ok(trail) => dispatchers.push(Arc::new(trail)),
            Err(e) => log::warn!("Audit trail init failed: {} - events will not be recorded", e),
        }
    }

    if let Some(config) = config {
        let timeout = Duration::from_secs(DEFAULT_NOTIFY_TIMEOUT_SECS);
        match TelegramDispatcher::new(&config.telegram, timeout) {
            Ok(mut telegram) => {
                if let Some(severity) = min_severity {
                    telegram = telegram.with_min_severity(severity);
                }
                log::info!(
                    "Telegram alerts enabled (token hash {})",
                    &config.telegram.token_hash(identity.fingerprint())[..12]
                );
                dispatchers.push(Arc::new(telegram));
            }
            Err(NotifyError::NotConfigured) => log::warn!("Telegram not configured; alerts go to the log only"),
            Err(e) => log::warn!("Telegram dispatcher unavailable: {}", e),
        }
    }

    dispatchers
}

/// The app's own files (templates, audit logs, envelope) are never candidates
fn excluded_dirs(paths: &AppPaths, templates_dir: &Path) -> Vec<PathBuf> {
    let mut excluded = vec![paths.data_dir.clone(), templates_dir.to_path_buf()];
    // Watch events carry resolved paths when a root is reached through a symlink
    let resolved: Vec<PathBuf> = excluded
        .iter()
        .filter_map(|dir| std::fs::canonicalize(dir).ok())
        .collect();
    excluded.extend(resolved);
    excluded.sort();
    excluded.dedup();
    excluded
}

fn watch_roots(args: &RunArgs, config: Option<&ProtectorConfig>) -> Vec<PathBuf> {
    if !args.watch.is_empty() {
        return args.watch.clone();
    }
    let all_drives = config.map_or(true, |c| c.xml_protection.monitor_all_drives);
    if all_drives {
        get_watch_roots()
    } else {
        dirs::home_dir().into_iter().collect()
    }
}
