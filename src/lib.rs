pub mod kernel;
pub mod services;

// The tick orchestrator is the crate's entry point
pub use kernel::reactor::Reactor;
