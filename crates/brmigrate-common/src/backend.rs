//! Host network backend abstraction.
//!
//! The migration engine reads kernel state and applies [`NetOp`]s only
//! through this trait. The production implementation talks to iproute2;
//! tests substitute an in-memory host.

use async_trait::async_trait;

use crate::error::MigrateResult;
use crate::ops::NetOp;
use crate::types::{AddressEntry, Family, InterfaceState, RouteEntry};

/// Structured access to host network configuration.
#[async_trait]
pub trait NetBackend: Send {
    /// Returns the named link, or `None` if it does not exist.
    async fn link(&self, name: &str) -> MigrateResult<Option<InterfaceState>>;

    /// Returns every address configured on the named link, in kernel order.
    async fn addresses(&self, name: &str) -> MigrateResult<Vec<AddressEntry>>;

    /// Returns the main-table routes of one family whose egress device is `name`.
    ///
    /// Routes the kernel derived from an address prefix are excluded.
    async fn routes(&self, name: &str, family: Family) -> MigrateResult<Vec<RouteEntry>>;

    /// Verifies the backend can run; `live` additionally requires privilege to mutate.
    async fn preflight(&self, live: bool) -> MigrateResult<()>;

    /// Applies one mutating operation.
    async fn apply(&mut self, op: &NetOp) -> MigrateResult<()>;
}
