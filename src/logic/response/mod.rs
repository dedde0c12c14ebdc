//! Response Module - Alert Dispatch
//!
//! The protection engine only knows the `AlertDispatcher` boundary; transport,
//! retries and authorization belong to the implementations.
//!
//! # Components
//! - `types.rs`: StructuredEvent, severities, NotifyError
//! - `telegram.rs`: Telegram Bot API dispatcher
//! - `notifier.rs`: bounded fire-and-forget queue, log/memory dispatchers

pub mod notifier;
pub mod telegram;
pub mod types;

#[cfg(test)]
pub use notifier::MemoryDispatcher;
pub use notifier::{LogDispatcher, Notifier};
pub use telegram::TelegramDispatcher;
pub use types::{AlertSeverity, EventKind, NotifyError, StructuredEvent};

/// Receives structured protection/config events
pub trait AlertDispatcher: Send + Sync {
    fn name(&self) -> &str;

    fn try_send(&self, event: &StructuredEvent) -> Result<(), NotifyError>;

    /// Deliver an event; failures are logged, never propagated
    fn send(&self, event: &StructuredEvent) -> bool {
        match self.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Dispatcher {} failed for '{}': {}", self.name(), event.title, e);
                false
            }
        }
    }
}
