//! Protection Types

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::logic::templates::{CanonicalFields, Template};

// ============================================================================
// WATCH EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatchEventKind {
    Created,
    Modified,
}

/// Raw filesystem notification for one path
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub observed_at: Instant,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: WatchEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            observed_at: Instant::now(),
        }
    }
}

// ============================================================================
// DECISIONS
// ============================================================================

/// Why a settled candidate was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Gone or not a regular file by the time it settled
    NotAFile,
    /// Not well-formed XML (or unreadable)
    Unparseable(String),
    /// No tax id element
    NoTaxId,
    /// No template for the tax id
    NoTemplate { tax_id: String },
    /// Same tax id, other canonical fields differ
    FieldMismatch { differing: Vec<&'static str> },
    /// Bytes already equal the template
    AlreadyCanonical,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::NotAFile => "not_a_file",
            IgnoreReason::Unparseable(_) => "unparseable",
            IgnoreReason::NoTaxId => "no_tax_id",
            IgnoreReason::NoTemplate { .. } => "no_template",
            IgnoreReason::FieldMismatch { .. } => "field_mismatch",
            IgnoreReason::AlreadyCanonical => "already_canonical",
        }
    }
}

/// Result of evaluating one settled path
#[derive(Debug, Clone)]
pub struct ProtectionDecision {
    pub path: PathBuf,
    pub matched: bool,
    pub template: Option<Arc<Template>>,
    /// Fields extracted from the candidate, when it parsed
    pub fields: Option<CanonicalFields>,
    /// Set when `matched` is false
    pub ignored: Option<IgnoreReason>,
}

impl ProtectionDecision {
    pub fn matched(path: PathBuf, fields: CanonicalFields, template: Arc<Template>) -> Self {
        Self {
            path,
            matched: true,
            template: Some(template),
            fields: Some(fields),
            ignored: None,
        }
    }

    pub fn ignored(
        path: PathBuf,
        reason: IgnoreReason,
        fields: Option<CanonicalFields>,
        template: Option<Arc<Template>>,
    ) -> Self {
        Self {
            path,
            matched: false,
            template,
            fields,
            ignored: Some(reason),
        }
    }
}

/// Terminal state of one Evaluating/Protecting cycle
#[derive(Debug)]
pub enum ProtectionOutcome {
    Protected {
        decision: ProtectionDecision,
        backup_path: PathBuf,
    },
    Failed {
        decision: ProtectionDecision,
        error: ProtectionError,
    },
    Ignored(ProtectionDecision),
}

impl ProtectionOutcome {
    pub fn decision(&self) -> &ProtectionDecision {
        match self {
            ProtectionOutcome::Protected { decision, .. } => decision,
            ProtectionOutcome::Failed { decision, .. } => decision,
            ProtectionOutcome::Ignored(decision) => decision,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Restore failures. Reported as events; never stop the watcher.
#[derive(Debug, thiserror::Error)]
pub enum ProtectionError {
    #[error("backup of {path} to {backup} failed: {source}")]
    BackupFailed {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("overwrite of {path} failed (backup kept at {backup}): {source}")]
    WriteFailed {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// STATS
// ============================================================================

/// Engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    pub events: AtomicU64,
    pub evaluations: AtomicU64,
    pub protected: AtomicU64,
    pub ignored: AtomicU64,
    pub failed: AtomicU64,
}

/// Point-in-time copy of `EngineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub events: u64,
    pub evaluations: u64,
    pub protected: u64,
    pub ignored: u64,
    pub failed: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            protected: self.protected.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record(&self, outcome: &ProtectionOutcome) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ProtectionOutcome::Protected { .. } => &self.protected,
            ProtectionOutcome::Failed { .. } => &self.failed,
            ProtectionOutcome::Ignored(_) => &self.ignored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
