//! Autonomy governors: a per-minute attempt budget and an exponential
//! failure backoff. They are independent; the tick path consults both.

pub mod backoff;
pub mod budget;

pub use backoff::AutonomyBackoff;
pub use budget::AutonomyBudget;
