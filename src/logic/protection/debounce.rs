//! Settle-window Debouncer
//!
//! Tracks the last event time per path. A path is handed out once no event
//! has been seen for it for a full settle window. Time is passed in, so the
//! debouncer itself never sleeps.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer {
    settle: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            pending: HashMap::new(),
        }
    }

    /// Record an event; (re)starts the settle timer for the path
    pub fn observe(&mut self, path: PathBuf, at: Instant) {
        self.pending.insert(path, at);
    }

    /// Remove and return every path whose settle window has elapsed
    pub fn take_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let settle = self.settle;
        let mut settled: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= settle)
            .map(|(path, _)| path.clone())
            .collect();

        for path in &settled {
            self.pending.remove(path);
        }
        settled.sort();
        settled
    }

    /// Earliest instant at which some path settles
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().map(|last| *last + self.settle)
    }

    /// Drop everything still settling (shutdown)
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTLE: Duration = Duration::from_millis(1000);

    #[test]
    fn test_burst_settles_once() {
        let mut debouncer = Debouncer::new(SETTLE);
        let start = Instant::now();
        let path = PathBuf::from("/data/tk.xml");

        for i in 0..5 {
            debouncer.observe(path.clone(), start + Duration::from_millis(i * 40));
        }

        // Timer restarts at the last event (160ms)
        assert!(debouncer.take_settled(start + Duration::from_millis(1100)).is_empty());
        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(1160))
        );

        let settled = debouncer.take_settled(start + Duration::from_millis(1160));
        assert_eq!(settled, vec![path]);
        assert!(debouncer.is_empty());
        assert!(debouncer.take_settled(start + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_paths_settle_independently() {
        let mut debouncer = Debouncer::new(SETTLE);
        let start = Instant::now();
        debouncer.observe(PathBuf::from("a.xml"), start);
        debouncer.observe(PathBuf::from("b.xml"), start + Duration::from_millis(500));

        let first = debouncer.take_settled(start + Duration::from_millis(1000));
        assert_eq!(first, vec![PathBuf::from("a.xml")]);
        assert_eq!(debouncer.len(), 1);

        let second = debouncer.take_settled(start + Duration::from_millis(1500));
        assert_eq!(second, vec![PathBuf::from("b.xml")]);
    }

    #[test]
    fn test_next_deadline_empty() {
        let debouncer = Debouncer::new(SETTLE);
        assert!(debouncer.next_deadline().is_none());
    }

    #[test]
    fn test_clear() {
        let mut debouncer = Debouncer::new(SETTLE);
        debouncer.observe(PathBuf::from("a.xml"), Instant::now());
        assert_eq!(debouncer.clear(), 1);
        assert!(debouncer.is_empty());
    }
}
