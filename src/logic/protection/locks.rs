//! Per-path Mutual Exclusion
//!
//! At most one Evaluating/Protecting cycle runs for a path. A path that
//! settles again while its cycle is running is marked pending, and the
//! running worker repeats the cycle once instead of a second worker starting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathState {
    Busy,
    BusyWithPending,
}

/// Shared lock map; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    inner: Arc<Mutex<HashMap<PathBuf, PathState>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the path. `None` means a cycle is already running; the request
    /// is folded into it as a pending rerun.
    pub fn try_acquire(&self, path: &Path) -> Option<PathGuard> {
        let mut map = self.inner.lock();
        match map.get_mut(path) {
            Some(state) => {
                *state = PathState::BusyWithPending;
                None
            }
            None => {
                map.insert(path.to_path_buf(), PathState::Busy);
                Some(PathGuard {
                    locks: self.clone(),
                    path: path.to_path_buf(),
                    held: true,
                })
            }
        }
    }

    #[cfg(test)]
    pub fn is_locked(&self, path: &Path) -> bool {
        self.inner.lock().contains_key(path)
    }

    /// Paths with a cycle in flight
    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Ownership of one path's cycle. Released on drop.
#[derive(Debug)]
pub struct PathGuard {
    locks: PathLocks,
    path: PathBuf,
    held: bool,
}

impl PathGuard {
    /// Call after each cycle. Returns true if more events arrived meanwhile
    /// and the cycle must run again (the path stays claimed); otherwise the
    /// path is released.
    pub fn finish_cycle(&mut self) -> bool {
        if !self.held {
            return false;
        }
        let mut map = self.locks.inner.lock();
        match map.get_mut(&self.path) {
            Some(state) if *state == PathState::BusyWithPending => {
                *state = PathState::Busy;
                true
            }
            _ => {
                map.remove(&self.path);
                self.held = false;
                false
            }
        }
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        if self.held {
            self.locks.inner.lock().remove(&self.path);
        }
    }
}
