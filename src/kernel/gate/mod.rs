//! Executive Gate: speech arbitration.
//!
//! # ORDER INVARIANT
//! Reactive candidates always win (only a tool domain mismatch can veto
//! them) and are never subject to the silence window, voice pressure or
//! social checks. Everything else competes on strength and must clear
//! every gate in order.

pub mod executive;
pub mod types;

pub use executive::{compute_candidate_strength, compute_voice_pressure, ExecutiveGate};
pub use types::*;
