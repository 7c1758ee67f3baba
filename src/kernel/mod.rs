//! Tick scheduler and speech arbitration kernel.
//!
//! Leaf to root: [`trace`] → [`bus`] → [`scope`] → [`mode`] → [`autonomy`]
//! → [`gate`] → [`commit`] → [`reactor`].
//!
//! The kernel never generates content. Producers (see [`producer`]) hand it
//! candidates; it decides which one, if any, becomes the tick's single
//! observable action and stamps every side effect with the tick's trace id.

pub mod autonomy;
pub mod bus;
pub mod commit;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod mode;
pub mod producer;
pub mod reactor;
pub mod scope;
pub mod telemetry;
pub mod time;
pub mod trace;
