//! Link inspection and address/route enumeration.
//!
//! A [`Snapshot`] is read fresh at the start of every run and never
//! refreshed while the plan executes.

use serde::Serialize;
use tracing::{debug, instrument};

use brmigrate_common::{
    AddressEntry, Family, InterfaceState, MigrateError, MigrateResult, NetBackend, RouteEntry,
};

/// Returns the state of `name`, or `InterfaceNotFound`.
pub async fn inspect_link<B>(backend: &B, name: &str) -> MigrateResult<InterfaceState>
where
    B: NetBackend + ?Sized,
{
    backend
        .link(name)
        .await?
        .ok_or_else(|| MigrateError::interface_not_found(name))
}

/// Returns all addresses on `name`, both families, in kernel order.
pub async fn enumerate_addresses<B>(backend: &B, name: &str) -> MigrateResult<Vec<AddressEntry>>
where
    B: NetBackend + ?Sized,
{
    backend.addresses(name).await
}

/// Returns default and on-link routes leaving through `name`, IPv4 first.
pub async fn enumerate_routes<B>(backend: &B, name: &str) -> MigrateResult<Vec<RouteEntry>>
where
    B: NetBackend + ?Sized,
{
    let mut routes = Vec::new();
    for family in Family::ALL {
        routes.extend(backend.routes(name, family).await?);
    }
    Ok(routes)
}

/// Addresses and routes of one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct L3State {
    /// Configured addresses
    pub addresses: Vec<AddressEntry>,
    /// Default and on-link routes
    pub routes: Vec<RouteEntry>,
}

impl L3State {
    /// Returns true if `entry`'s prefix is configured here
    pub fn has_address(&self, entry: &AddressEntry) -> bool {
        self.addresses.iter().any(|a| a.cidr == entry.cidr)
    }

    /// Returns true if an equivalent route is installed here
    pub fn has_route(&self, route: &RouteEntry) -> bool {
        self.routes.iter().any(|r| r.same_target(route))
    }

    /// Addresses that move with a migration
    pub fn migratable_addresses(&self) -> impl Iterator<Item = &AddressEntry> {
        self.addresses.iter().filter(|a| a.is_migratable())
    }
}

/// Pre-migration view of the source interface and the target bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Source link
    pub source: InterfaceState,
    /// Source addresses and routes
    pub source_l3: L3State,
    /// Bridge link, if a device of that name exists
    pub bridge: Option<InterfaceState>,
    /// Bridge addresses and routes (empty when the bridge is absent)
    pub bridge_l3: L3State,
}

impl Snapshot {
    /// Read the current state of `iface` and `bridge`.
    #[instrument(skip(backend))]
    pub async fn capture<B>(backend: &B, iface: &str, bridge: &str) -> MigrateResult<Self>
    where
        B: NetBackend + ?Sized,
    {
        let source = inspect_link(backend, iface).await?;
        let source_l3 = L3State {
            addresses: enumerate_addresses(backend, iface).await?,
            routes: enumerate_routes(backend, iface).await?,
        };

        let bridge_link = backend.link(bridge).await?;
        let bridge_l3 = match bridge_link {
            Some(_) => L3State {
                addresses: enumerate_addresses(backend, bridge).await?,
                routes: enumerate_routes(backend, bridge).await?,
            },
            None => L3State::default(),
        };

        debug!(
            iface,
            bridge,
            addresses = source_l3.addresses.len(),
            routes = source_l3.routes.len(),
            bridge_exists = bridge_link.is_some(),
            "Captured snapshot"
        );

        Ok(Self {
            source,
            source_l3,
            bridge: bridge_link,
            bridge_l3,
        })
    }
}
