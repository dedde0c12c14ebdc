//! API Module
//!
//! Operator-facing surface over the core: config sealing, inspection and the
//! long-running protection service. The core never depends on this layer.

pub mod commands;

pub use commands::AppPaths;
