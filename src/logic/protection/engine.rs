//! Protection Engine
//!
//! Settle -> evaluate -> protect, per path:
//!
//! ```text
//! Idle -> Settling (event) -> Settling (event, timer reset)
//!      -> Evaluating (timer elapsed)
//!      -> Idle (ignored) | Protecting -> Idle (success / failure)
//! ```
//!
//! The pipeline task owns the debouncer. Settled paths go to a bounded pool
//! of blocking workers; `PathLocks` keeps one cycle per path.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::debounce::Debouncer;
use super::locks::PathLocks;
use super::restore::backup_and_restore;
use super::types::{
    EngineStats, EngineStatsSnapshot, IgnoreReason, ProtectionDecision, ProtectionError,
    ProtectionOutcome, WatchEvent,
};
use crate::constants::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SETTLE_MS};
use crate::logic::response::{AlertSeverity, EventKind, Notifier, StructuredEvent};
use crate::logic::templates::{extract_from_bytes, is_xml_path, TemplateIndex};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quiet period after the last event on a path
    pub settle: Duration,
    /// Concurrent evaluate/protect cycles
    pub workers: usize,
    /// Bounded event queue size
    pub queue_capacity: usize,
    /// Directories whose files are never candidates (the app's own data)
    pub excluded: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            excluded: Vec::new(),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ProtectionEngine {
    templates: RwLock<Arc<TemplateIndex>>,
    notifier: Arc<Notifier>,
    locks: PathLocks,
    stats: EngineStats,
    config: EngineConfig,
}

impl ProtectionEngine {
    pub fn new(templates: TemplateIndex, notifier: Arc<Notifier>, config: EngineConfig) -> Self {
        Self {
            templates: RwLock::new(Arc::new(templates)),
            notifier,
            locks: PathLocks::new(),
            stats: EngineStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current template snapshot
    pub fn templates(&self) -> Arc<TemplateIndex> {
        self.templates.read().clone()
    }

    /// Swap in a freshly loaded index. Cycles already running keep the old one.
    pub fn replace_templates(&self, index: TemplateIndex) {
        let count = index.len();
        *self.templates.write() = Arc::new(index);
        log::info!("Template index replaced ({} templates)", count);
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Paths with an Evaluating/Protecting cycle running right now
    pub fn in_flight(&self) -> usize {
        self.locks.active()
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.config.excluded.iter().any(|dir| path.starts_with(dir))
    }

    // ------------------------------------------------------------------------
    // Evaluating
    // ------------------------------------------------------------------------

    /// Read and classify a settled path
    pub fn evaluate(&self, path: &Path) -> ProtectionDecision {
        if !path.is_file() {
            return ProtectionDecision::ignored(path.to_path_buf(), IgnoreReason::NotAFile, None, None);
        }
        match std::fs::read(path) {
            Ok(bytes) => self.evaluate_bytes(path, &bytes),
            Err(e) => ProtectionDecision::ignored(
                path.to_path_buf(),
                IgnoreReason::Unparseable(e.to_string()),
                None,
                None,
            ),
        }
    }

    /// Classify candidate content. Protection requires all four fields equal.
    pub fn evaluate_bytes(&self, path: &Path, bytes: &[u8]) -> ProtectionDecision {
        let path_buf = path.to_path_buf();

        let fields = match extract_from_bytes(bytes, path) {
            Ok(fields) => fields,
            Err(e) => {
                return ProtectionDecision::ignored(
                    path_buf,
                    IgnoreReason::Unparseable(e.to_string()),
                    None,
                    None,
                )
            }
        };

        let Some(tax_id) = fields.tax_id.clone() else {
            return ProtectionDecision::ignored(path_buf, IgnoreReason::NoTaxId, Some(fields), None);
        };

        let Some(template) = self.templates().lookup(&tax_id) else {
            return ProtectionDecision::ignored(
                path_buf,
                IgnoreReason::NoTemplate { tax_id },
                Some(fields),
                None,
            );
        };

        let differing = template.fields.differing_fields(&fields);
        if !differing.is_empty() {
            return ProtectionDecision::ignored(
                path_buf,
                IgnoreReason::FieldMismatch { differing },
                Some(fields),
                Some(template),
            );
        }

        if bytes == template.canonical_content.as_slice() {
            return ProtectionDecision::ignored(
                path_buf,
                IgnoreReason::AlreadyCanonical,
                Some(fields),
                Some(template),
            );
        }

        ProtectionDecision::matched(path_buf, fields, template)
    }

    // ------------------------------------------------------------------------
    // Protecting
    // ------------------------------------------------------------------------

    /// Run the cycle for a settled path under its lock. Returns `None` when
    /// another worker already owns the path (the request reruns there).
    pub fn process_path(&self, path: &Path) -> Option<ProtectionOutcome> {
        let mut guard = self.locks.try_acquire(path)?;
        let mut outcome = self.run_cycle(path);
        while guard.finish_cycle() {
            log::debug!("Re-evaluating {} (changed during cycle)", path.display());
            outcome = self.run_cycle(path);
        }
        Some(outcome)
    }

    fn run_cycle(&self, path: &Path) -> ProtectionOutcome {
        let decision = self.evaluate(path);
        let outcome = self.protect(decision);
        self.stats.record(&outcome);
        self.report(&outcome);
        outcome
    }

    fn protect(&self, decision: ProtectionDecision) -> ProtectionOutcome {
        let Some(template) = decision.template.clone().filter(|_| decision.matched) else {
            return ProtectionOutcome::Ignored(decision);
        };

        match backup_and_restore(&decision.path, &template.canonical_content) {
            Ok(backup_path) => ProtectionOutcome::Protected {
                decision,
                backup_path,
            },
            Err(error) => ProtectionOutcome::Failed { decision, error },
        }
    }

    /// Log every outcome; publish the ones worth an alert
    fn report(&self, outcome: &ProtectionOutcome) {
        let decision = outcome.decision();
        let path = decision.path.display();

        match outcome {
            ProtectionOutcome::Protected { .. } => {
                log::warn!("Protected {} from template", path);
            }
            ProtectionOutcome::Failed { error, .. } => {
                log::error!("Protection failed for {}: {}", path, error);
            }
            ProtectionOutcome::Ignored(decision) => match &decision.ignored {
                Some(IgnoreReason::FieldMismatch { differing }) => {
                    log::info!("Near-miss on {}: differs in {}", path, differing.join(", "));
                }
                Some(reason) => log::debug!("Ignored {}: {}", path, reason.as_str()),
                None => {}
            },
        }

        if let Some(event) = build_event(outcome) {
            self.notifier.publish(event);
        }
    }

    // ------------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------------

    /// Start the settle/worker pipeline on the current runtime
    pub fn start(self: &Arc<Self>, events: mpsc::Receiver<WatchEvent>) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(pipeline(self.clone(), events, shutdown_rx));
        log::info!(
            "Protection engine started (settle {:?}, {} workers)",
            self.config.settle,
            self.config.workers
        );
        EngineHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running pipeline
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Stop taking events, let in-flight cycles finish, then return
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::error!("Engine pipeline task failed: {}", e);
        }
    }
}

async fn pipeline(
    engine: Arc<ProtectionEngine>,
    mut events: mpsc::Receiver<WatchEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut debouncer = Debouncer::new(engine.config.settle);
    let semaphore = Arc::new(Semaphore::new(engine.config.workers.max(1)));
    let mut workers: JoinSet<()> = JoinSet::new();

    loop {
        let deadline = debouncer.next_deadline();
        let settle_timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            received = events.recv() => match received {
                Some(event) => {
                    engine.stats.events.fetch_add(1, Ordering::Relaxed);
                    log::trace!("{:?} {}", event.kind, event.path.display());
                    if !is_xml_path(&event.path) {
                        continue;
                    }
                    if engine.is_excluded(&event.path) {
                        log::debug!("Skipping {} (excluded directory)", event.path.display());
                        continue;
                    }
                    debouncer.observe(event.path, event.observed_at);
                }
                None => {
                    log::info!("Event sources closed");
                    break;
                }
            },
            _ = settle_timer => {
                for path in debouncer.take_settled(std::time::Instant::now()) {
                    spawn_cycle(&engine, &semaphore, &mut workers, path);
                }
            }
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = joined {
                    log::error!("Protection worker failed: {}", e);
                }
            }
        }
    }

    let dropped = debouncer.clear();
    if dropped > 0 {
        log::info!("Shutdown: {} unsettled paths dropped", dropped);
    }

    // Queued cycles never start; running ones finish
    semaphore.close();
    let running = engine.in_flight();
    if running > 0 {
        log::info!("Shutdown: waiting for {} running cycles", running);
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            log::error!("Protection worker failed: {}", e);
        }
    }
    log::info!("Protection engine stopped");
}

fn spawn_cycle(
    engine: &Arc<ProtectionEngine>,
    semaphore: &Arc<Semaphore>,
    workers: &mut JoinSet<()>,
    path: PathBuf,
) {
    let engine = engine.clone();
    let semaphore = semaphore.clone();

    workers.spawn(async move {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            log::debug!("Skipping {} (shutting down)", path.display());
            return;
        };
        let result = tokio::task::spawn_blocking(move || engine.process_path(&path)).await;
        if let Err(e) = result {
            log::error!("Protection cycle panicked: {}", e);
        }
    });
}

// ============================================================================
// EVENTS
// ============================================================================

/// Alert for a terminal outcome. Ignored paths only produce one when a
/// template was found but the fields differed (near-miss).
pub fn build_event(outcome: &ProtectionOutcome) -> Option<StructuredEvent> {
    let decision = outcome.decision();

    let mut event = match outcome {
        ProtectionOutcome::Protected { backup_path, .. } => {
            let mut event = StructuredEvent::new(
                EventKind::ProtectionSucceeded,
                "XML PROTECTION ALERT",
                "Protected file was replaced with its template content",
                AlertSeverity::High,
            );
            event.backup_path = Some(backup_path.clone());
            event
        }
        ProtectionOutcome::Failed { error, .. } => {
            let mut event = StructuredEvent::new(
                EventKind::ProtectionFailed,
                "XML PROTECTION FAILED",
                "Protected file could not be restored",
                AlertSeverity::Critical,
            );
            event.error = Some(error.to_string());
            if let ProtectionError::WriteFailed { backup, .. } = error {
                event.backup_path = Some(backup.clone());
            }
            event
        }
        ProtectionOutcome::Ignored(decision) => match &decision.ignored {
            Some(IgnoreReason::FieldMismatch { differing }) => {
                let mut event = StructuredEvent::new(
                    EventKind::NearMiss,
                    "XML near-miss",
                    "Template exists for this tax id but other fields differ; no action taken",
                    AlertSeverity::Info,
                );
                event.differing_fields = differing.iter().map(|f| f.to_string()).collect();
                event
            }
            _ => return None,
        },
    };

    event = event.with_path(decision.path.clone());
    if let Some(ref fields) = decision.fields {
        event = event.with_fields(fields.clone());
    }
    event.template_path = decision.template.as_ref().map(|t| t.source_path.clone());
    Some(event)
}
