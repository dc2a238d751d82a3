#![forbid(unsafe_code)]

//! # fleet
//!
//! The engine behind fleet-cli: run a batch of commands on many SSH hosts at
//! once and hear back from each host as soon as it is done.
//!
//! - Session establishment, direct or tunnelled through a jump host
//! - Sequential, fail-fast command execution on each session
//! - Per-host faults reduced to a `(code, message)` outcome
//! - Completion-ordered fan-out with an optional concurrency bound

pub mod config;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod log;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use config::RunSettings;
pub use error::HostError;
pub use executor::fanout::Fanout;
pub use executor::{HostReport, Outcome, Progress};
pub use inventory::{HostDescriptor, JumpHost, JumpHostMap};
