//! Telegram Alert Dispatcher
//!
//! Sends protection alerts to a Telegram chat through the Bot API.
//!
//! Features:
//! - Markdown formatting with escaping
//! - Severity filtering
//! - Short request timeout (slow targets never stall the caller)

use std::time::Duration;

use super::types::{AlertSeverity, NotifyError, StructuredEvent};
use super::AlertDispatcher;
use crate::constants::TELEGRAM_API_URL;
use crate::logic::secure_config::TelegramSettings;

pub struct TelegramDispatcher {
    api_url: String,
    bot_token: String,
    chat_id: String,
    min_severity: AlertSeverity,
    agent: ureq::Agent,
}

impl TelegramDispatcher {
    pub fn new(settings: &TelegramSettings, timeout: Duration) -> Result<Self, NotifyError> {
        if !settings.is_configured() {
            return Err(NotifyError::NotConfigured);
        }

        Ok(Self {
            api_url: TELEGRAM_API_URL.to_string(),
            bot_token: settings.bot_token.clone(),
            chat_id: settings.chat_id.clone(),
            min_severity: AlertSeverity::Low,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }

    pub fn with_min_severity(mut self, severity: AlertSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Point at another Bot API host
    #[cfg(test)]
    pub fn with_api_url(mut self, url: &str) -> Self {
        self.api_url = url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }

    /// Request body for one event
    pub fn format_message(&self, event: &StructuredEvent) -> String {
        let mut text = format!(
            "{} *{}*\n\n{}",
            event.severity.tag(),
            escape_markdown(&event.title),
            escape_markdown(&event.message)
        );

        if let Some(ref path) = event.path {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            text.push_str(&format!("\n\n*File:* `{}`", escape_code(&name)));
        }

        if let Some(ref fields) = event.fields {
            let show = |v: &Option<String>| escape_code(v.as_deref().unwrap_or("-"));
            text.push_str(&format!("\n*MST:* `{}`", show(&fields.tax_id)));
            text.push_str(&format!("\n*Company:* `{}`", show(&fields.company_name)));
            text.push_str(&format!("\n*Type:* `{}`", show(&fields.document_type)));
            text.push_str(&format!("\n*Period:* `{}`", show(&fields.period)));
        }

        if !event.differing_fields.is_empty() {
            text.push_str(&format!(
                "\n*Differs in:* {}",
                escape_markdown(&event.differing_fields.join(", "))
            ));
        }

        if let Some(ref error) = event.error {
            text.push_str(&format!("\n*Error:* {}", escape_markdown(error)));
        }

        if let Some(ref hostname) = event.hostname {
            text.push_str(&format!("\n*Host:* {}", escape_markdown(hostname)));
        }

        let time = chrono::DateTime::from_timestamp(event.timestamp, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        text.push_str(&format!("\n*Time:* `{}`", time));

        serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown"
        })
        .to_string()
    }
}

impl AlertDispatcher for TelegramDispatcher {
    fn name(&self) -> &str {
        "telegram"
    }

    fn try_send(&self, event: &StructuredEvent) -> Result<(), NotifyError> {
        if event.severity < self.min_severity {
            return Ok(());
        }

        let body = self.format_message(event);
        let response = self
            .agent
            .post(&self.endpoint())
            .set("Content-Type", "application/json")
            .send_string(&body);

        match response {
            Ok(_) => {
                log::info!("Telegram alert sent: {}", event.title);
                Ok(())
            }
            Err(ureq::Error::Status(status, _)) => Err(NotifyError::Rejected { status }),
            Err(ureq::Error::Transport(transport)) => {
                if is_timeout(&transport) {
                    Err(NotifyError::Timeout)
                } else {
                    Err(NotifyError::Unreachable {
                        reason: transport.to_string(),
                    })
                }
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let io_timeout = std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .map(|e| matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock))
        .unwrap_or(false);
    io_timeout || transport.to_string().contains("timed out")
}

/// Legacy Markdown has no escape inside a code span; a backtick would end it
fn escape_code(text: &str) -> String {
    text.replace('`', "'")
}

fn escape_markdown(text: &str) -> String {
    text.replace('*', "\\*")
        .replace('_', "\\_")
        .replace('`', "\\`")
        .replace('[', "\\[")
}
