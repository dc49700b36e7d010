//! Common infrastructure for the interface-to-bridge migration engine.
//!
//! - [`types`]: typed snapshot records (links, addresses, routes)
//! - [`ops`]: mutating kernel operations and their command rendering
//! - [`backend`]: the [`NetBackend`] trait the engine reads and writes through
//! - [`shell`]: safe shell command execution with proper quoting
//! - [`error`]: error taxonomy for migration runs
//!
//! # Example
//!
//! ```ignore
//! use brmigrate_common::{NetOp, MigrateResult, shell};
//!
//! async fn bring_up(dev: &str) -> MigrateResult<()> {
//!     let op = NetOp::LinkUp { dev: dev.to_string() };
//!     shell::exec_or_throw(&op.to_command()).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod ops;
pub mod shell;
pub mod types;

pub use backend::NetBackend;
pub use error::{MigrateError, MigrateResult};
pub use ops::{BridgeTuning, NetOp, PortFlags};
pub use types::{
    AddrScope, AddressEntry, Family, InterfaceState, IpCidr, OperState, RouteEntry, RouteKind,
    BRIDGE_KIND,
};
