//! Logic Module - Core Engines
//!
//! - `identity/` - Machine fingerprint (hardware derived, persisted fallback)
//! - `secure_config/` - Key derivation and tenant/machine bound config envelopes
//! - `templates/` - Canonical field extraction and the template index
//! - `protection/` - Watch, settle, compare, restore
//! - `response/` - Alert dispatch boundary and its transports
//! - `telemetry/` - JSONL audit trail

pub mod identity;
pub mod protection;
pub mod response;
pub mod secure_config;
pub mod telemetry;
pub mod templates;
