//! Protection Module
//!
//! Watches roots for XML writes, waits for each path to settle, compares the
//! candidate with the template for its tax id and restores the template on an
//! exact four-field match.
//!
//! # Components
//! - `types.rs`: watch events, decisions, outcomes, errors, counters
//! - `watcher.rs`: `notify` event sources feeding the bounded queue
//! - `debounce.rs`: settle-window tracking
//! - `locks.rs`: one cycle per path, with coalesced reruns
//! - `restore.rs`: backup then overwrite
//! - `engine.rs`: evaluation, worker pool, alert building

pub mod debounce;
pub mod engine;
pub mod locks;
pub mod restore;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod tests;

pub use engine::{EngineConfig, ProtectionEngine};
pub use types::WatchEvent;
pub use watcher::RootWatchers;
