//! Fire-and-forget Notification Queue
//!
//! Protection cycles publish events here and move on. A single background
//! thread drains the bounded queue and hands each event to every dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::types::{AlertSeverity, NotifyError, StructuredEvent};
use super::AlertDispatcher;

/// Counters for the notification queue
#[derive(Debug, Default)]
pub struct NotifierStats {
    pub published: AtomicU64,
    pub dropped: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
}

pub struct Notifier {
    sender: Mutex<Option<SyncSender<StructuredEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<NotifierStats>,
}

impl Notifier {
    /// Spawn the delivery thread
    pub fn start(dispatchers: Vec<Arc<dyn AlertDispatcher>>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<StructuredEvent>(capacity.max(1));
        let stats = Arc::new(NotifierStats::default());
        let worker_stats = stats.clone();

        let worker = thread::Builder::new()
            .name("xml-guard-notifier".to_string())
            .spawn(move || {
                for event in receiver {
                    for dispatcher in &dispatchers {
                        if dispatcher.send(&event) {
                            worker_stats.delivered.fetch_add(1, Ordering::Relaxed);
                        } else {
                            worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                log::debug!("Notifier thread stopped");
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to start notifier thread: {} - alerts disabled", e);
                None
            }
        };

        Self {
            sender: Mutex::new(worker.as_ref().map(|_| sender)),
            worker: Mutex::new(worker),
            stats,
        }
    }

    /// Queue an event; never blocks. Returns false if it was dropped.
    pub fn publish(&self, event: StructuredEvent) -> bool {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            log::debug!("Notifier stopped, event dropped: {}", event.title);
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => {
                self.stats.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Notification queue full, event dropped: {}", event.title);
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Notifier thread gone, event dropped: {}", event.title);
                false
            }
        }
    }

    /// Stop accepting events, deliver what is queued, join the thread
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("Notifier thread panicked");
            }
        }
    }

    pub fn stats(&self) -> &NotifierStats {
        &self.stats
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// DISPATCHERS
// ============================================================================

/// "No notifications" mode: events only reach the log
pub struct LogDispatcher;

impl AlertDispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    fn try_send(&self, event: &StructuredEvent) -> Result<(), NotifyError> {
        let path = event
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match event.severity {
            AlertSeverity::Critical | AlertSeverity::High => log::warn!(
                "[{}] {} {} {}",
                event.kind.as_str(),
                event.title,
                event.message,
                path
            ),
            _ => log::info!(
                "[{}] {} {} {}",
                event.kind.as_str(),
                event.title,
                event.message,
                path
            ),
        }
        Ok(())
    }
}

/// Collects events in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemoryDispatcher {
    events: Mutex<Vec<StructuredEvent>>,
}

#[cfg(test)]
impl MemoryDispatcher {
    pub fn events(&self) -> Vec<StructuredEvent> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
impl AlertDispatcher for MemoryDispatcher {
    fn name(&self) -> &str {
        "memory"
    }

    fn try_send(&self, event: &StructuredEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
