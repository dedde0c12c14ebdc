//! Filesystem Event Source
//!
//! One recursive `notify` watcher per root. Create/modify notifications for
//! `.xml` files are forwarded into the engine's bounded queue; everything
//! else is dropped at the source.

use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::types::{WatchEvent, WatchEventKind};
use crate::logic::templates::is_xml_path;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("no watchable roots")]
    NoRoots,
}

/// Live watchers; dropping this stops every event source
pub struct RootWatchers {
    watchers: Vec<(PathBuf, RecommendedWatcher)>,
}

impl RootWatchers {
    /// Start a recursive watcher for each root. Roots that cannot be watched
    /// are logged and skipped; it is an error only if none can.
    pub fn start(roots: &[PathBuf], events: mpsc::Sender<WatchEvent>) -> Result<Self, WatchError> {
        let mut watchers = Vec::new();
        let mut last_error = None;

        for root in roots {
            match watch_root(root, events.clone()) {
                Ok(watcher) => {
                    log::info!("Watching {}", root.display());
                    watchers.push((root.clone(), watcher));
                }
                Err(e) => {
                    log::warn!("{}", e);
                    last_error = Some(e);
                }
            }
        }

        if watchers.is_empty() {
            return Err(last_error.unwrap_or(WatchError::NoRoots));
        }
        Ok(Self { watchers })
    }

    /// Roots actually being watched
    pub fn root_count(&self) -> usize {
        self.watchers.len()
    }
}

fn watch_root(root: &Path, events: mpsc::Sender<WatchEvent>) -> Result<RecommendedWatcher, WatchError> {
    let watch_err = |source: notify::Error| WatchError::Watch {
        path: root.to_path_buf(),
        source,
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) => {
            for watch_event in translate(&event) {
                // Runs on the notifier's own thread; blocking here applies
                // backpressure when the queue is full
                if events.blocking_send(watch_event).is_err() {
                    return;
                }
            }
        }
        Err(e) => log::warn!("Watch error: {}", e),
    })
    .map_err(watch_err)?;

    watcher.watch(root, RecursiveMode::Recursive).map_err(watch_err)?;
    Ok(watcher)
}

/// Map a raw notification to zero or more engine events
pub fn translate(event: &notify::Event) -> Vec<WatchEvent> {
    let kind = match event.kind {
        notify::EventKind::Create(_) => WatchEventKind::Created,
        notify::EventKind::Modify(_) => WatchEventKind::Modified,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|p| is_xml_path(p))
        .map(|p| WatchEvent::new(p.clone(), kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_translate_filters_kind_and_extension() {
        let created = notify::Event::new(notify::EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/d/a.xml"))
            .add_path(PathBuf::from("/d/a.xml.backup.1700000000"));
        let events = translate(&created);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, WatchEventKind::Created);

        let modified = notify::Event::new(notify::EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/d/B.XML"));
        assert_eq!(translate(&modified)[0].kind, WatchEventKind::Modified);

        let removed = notify::Event::new(notify::EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/d/a.xml"));
        assert!(translate(&removed).is_empty());
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let result = RootWatchers::start(&[dir.path().join("missing")], tx);
        assert!(matches!(result, Err(WatchError::Watch { .. })));
    }

    #[test]
    fn test_no_roots() {
        let (tx, _rx) = mpsc::channel(4);
        assert!(matches!(RootWatchers::start(&[], tx), Err(WatchError::NoRoots)));
    }
}
