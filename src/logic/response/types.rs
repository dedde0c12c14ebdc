//! Alert Types

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::logic::templates::CanonicalFields;

// ============================================================================
// SEVERITY
// ============================================================================

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl AlertSeverity {
    pub const ALL: [AlertSeverity; 5] = [
        AlertSeverity::Info,
        AlertSeverity::Low,
        AlertSeverity::Medium,
        AlertSeverity::High,
        AlertSeverity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "Info",
            AlertSeverity::Low => "Low",
            AlertSeverity::Medium => "Medium",
            AlertSeverity::High => "High",
            AlertSeverity::Critical => "Critical",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "[INFO]",
            AlertSeverity::Low => "[LOW]",
            AlertSeverity::Medium => "[MEDIUM]",
            AlertSeverity::High => "[HIGH]",
            AlertSeverity::Critical => "[CRITICAL]",
        }
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    /// Case-insensitive severity name (`info`, `low`, `medium`, `high`, `critical`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown severity '{}'", s))
    }
}

// ============================================================================
// STRUCTURED EVENT
// ============================================================================

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Candidate backed up and overwritten with the template
    ProtectionSucceeded,
    /// Backup or overwrite failed
    ProtectionFailed,
    /// Template exists for the tax id but the other fields differ
    NearMiss,
    ServiceStarted,
    ServiceStopped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProtectionSucceeded => "protection_succeeded",
            EventKind::ProtectionFailed => "protection_failed",
            EventKind::NearMiss => "near_miss",
            EventKind::ServiceStarted => "service_started",
            EventKind::ServiceStopped => "service_stopped",
        }
    }
}

/// Event handed to every `AlertDispatcher`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredEvent {
    pub id: String,
    pub kind: EventKind,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: i64,
    pub hostname: Option<String>,
    pub path: Option<PathBuf>,
    pub tax_id: Option<String>,
    /// Fields extracted from the candidate
    pub fields: Option<CanonicalFields>,
    pub template_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub differing_fields: Vec<String>,
    pub error: Option<String>,
    pub extra: HashMap<String, String>,
}

impl StructuredEvent {
    pub fn new(kind: EventKind, title: &str, message: &str, severity: AlertSeverity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            severity,
            timestamp: chrono::Utc::now().timestamp(),
            hostname: hostname::get().ok().map(|h| h.to_string_lossy().to_string()),
            path: None,
            tax_id: None,
            fields: None,
            template_path: None,
            backup_path: None,
            differing_fields: Vec::new(),
            error: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_fields(mut self, fields: CanonicalFields) -> Self {
        self.tax_id = fields.tax_id.clone();
        self.fields = Some(fields);
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// One JSON line (audit trail)
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Notification errors. Logged only; never affect a protection decision.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification target unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("notification timed out")]
    Timeout,

    #[error("notification rejected with status {status}")]
    Rejected { status: u16 },

    #[error("notification target not configured")]
    NotConfigured,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::Info < AlertSeverity::Low);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("high".parse::<AlertSeverity>(), Ok(AlertSeverity::High));
        assert_eq!(" Critical ".parse::<AlertSeverity>(), Ok(AlertSeverity::Critical));
        assert!("urgent".parse::<AlertSeverity>().is_err());
    }

    #[test]
    fn test_event_builders() {
        let fields = CanonicalFields {
            tax_id: Some("0123456789".into()),
            ..CanonicalFields::default()
        };
        let event = StructuredEvent::new(EventKind::NearMiss, "t", "m", AlertSeverity::Info)
            .with_path("/tmp/a.xml")
            .with_fields(fields)
            .with_extra("k", "v");

        assert_eq!(event.tax_id.as_deref(), Some("0123456789"));
        assert_eq!(event.extra.get("k").map(String::as_str), Some("v"));

        let line = event.to_jsonl();
        assert!(line.contains("\"near_miss\""));
        assert!(!line.contains('\n'));
        let back: StructuredEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }
}
