//! Tick telemetry.
//!
//! # SAFETY INVARIANT
//! Telemetry is a READ-ONLY side-effect layer fed from the bus.
//! It must **NEVER** be read inside decision logic (Gate, Committer, Governors).
//!
//! # PRIVACY INVARIANT
//! Telemetry events must **NEVER** contain speech or thought text.
//! Only tick numbers, reason codes, durations and counts are kept.

pub mod event;
pub mod metrics;
pub mod recorder;
