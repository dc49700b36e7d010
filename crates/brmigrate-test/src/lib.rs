//! Test infrastructure for the bridge migration engine
//!
//! Provides:
//! - An in-memory host implementing `NetBackend` with kernel-like semantics
//! - Host fixtures for common interface layouts
//! - Command and trace verification helpers

pub mod fixtures;
mod host;
mod verification;

pub use fixtures::*;
pub use host::{link_local_for, HostState, SimLink, SimRoute, SimulatedHost};
pub use verification::*;
