//! Telemetry Module
//!
//! Audit trail for protection events. Every restore, failure and near-miss
//! lands here as one JSON line, whether or not a chat target is configured.
//!
//! ## Structure
//! - `recorder.rs` - Append-only JSONL writer with size rotation

pub mod recorder;

pub use recorder::{list_log_files, read_events, AuditTrail};
