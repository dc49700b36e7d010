//! In-memory host with kernel-like link, address and route semantics
//!
//! `SimulatedHost` implements [`NetBackend`] so the migration engine can be
//! driven end to end without touching the real network stack. Operations
//! fail with the same messages iproute2 prints for the same conditions.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};
use tracing::debug;

use brmigrate_common::{
    shell::{BRIDGE_CMD, IP_CMD},
    AddrScope, AddressEntry, BridgeTuning, Family, InterfaceState, IpCidr, MigrateError,
    MigrateResult, NetBackend, NetOp, OperState, PortFlags, RouteEntry, RouteKind, BRIDGE_KIND,
};

const ERR_FILE_EXISTS: &str = "RTNETLINK answers: File exists";
const ERR_NO_DEVICE: &str = "Cannot find device";
const ERR_ADDR_NOT_AVAIL: &str = "RTNETLINK answers: Cannot assign requested address";
const ERR_ADDR_NOT_FOUND_V4: &str = "Error: ipv4: Address not found.";
const ERR_NO_SUCH_ROUTE: &str = "RTNETLINK answers: No such process";
const ERR_NET_DOWN: &str = "RTNETLINK answers: Network is down";
const ERR_UNREACHABLE: &str = "RTNETLINK answers: Network is unreachable";
const ERR_NOT_SUPPORTED: &str = "RTNETLINK answers: Operation not supported";
const ERR_NOT_PORT: &str = "Error: Device is not a bridge port";

/// One simulated link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimLink {
    /// Link attributes as the inspector sees them
    pub state: InterfaceState,
    /// Addresses in assignment order
    pub addresses: Vec<AddressEntry>,
    /// Port flags, once set
    pub port_flags: Option<PortFlags>,
    /// Bridge tuning, once set
    pub tuning: Option<BridgeTuning>,
}

/// One simulated route; kernel prefix routes are hidden from enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRoute {
    /// The route
    pub entry: RouteEntry,
    /// Installed by the kernel for an address prefix
    pub kernel: bool,
}

/// Full simulated network state, comparable for non-mutation checks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    /// Links by name
    pub links: BTreeMap<String, SimLink>,
    /// Main routing table
    pub routes: Vec<SimRoute>,
}

#[derive(Debug, Clone)]
struct FailureRule {
    command_contains: String,
    output: String,
}

/// In-memory [`NetBackend`]
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    state: HostState,
    applied: Vec<String>,
    failures: Vec<FailureRule>,
    tools_present: bool,
    privileged: bool,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

/// EUI-64 link-local address derived from a MAC
pub fn link_local_for(mac: &str) -> Option<IpCidr> {
    let bytes: Vec<u8> = mac
        .split(':')
        .map(|b| u8::from_str_radix(b, 16))
        .collect::<Result<_, _>>()
        .ok()?;
    if bytes.len() != 6 {
        return None;
    }
    let addr = Ipv6Addr::new(
        0xfe80,
        0,
        0,
        0,
        u16::from_be_bytes([bytes[0] ^ 0x02, bytes[1]]),
        u16::from_be_bytes([bytes[2], 0xff]),
        u16::from_be_bytes([0xfe, bytes[3]]),
        u16::from_be_bytes([bytes[4], bytes[5]]),
    );
    IpCidr::new(IpAddr::V6(addr), 64)
}

fn failed(op: &NetOp, output: &str) -> MigrateError {
    MigrateError::CommandFailed {
        command: op.to_command(),
        exit_code: 2,
        output: output.to_string(),
    }
}

impl SimulatedHost {
    /// Create an empty, privileged host with iproute2 present
    pub fn new() -> Self {
        Self {
            state: HostState::default(),
            applied: Vec::new(),
            failures: Vec::new(),
            tools_present: true,
            privileged: true,
        }
    }

    /// Add an Ethernet link, administratively up, with its EUI-64 link-local address
    pub fn with_ethernet(mut self, name: &str, mac: &str, mtu: u32) -> Self {
        let addresses = link_local_for(mac)
            .map(|cidr| AddressEntry {
                cidr,
                scope: AddrScope::Link,
            })
            .into_iter()
            .collect();
        self.state.links.insert(
            name.to_string(),
            SimLink {
                state: InterfaceState {
                    name: name.to_string(),
                    mac: mac.to_string(),
                    mtu,
                    oper_state: OperState::Up,
                    admin_up: true,
                    master: None,
                    kind: None,
                    vlan_filtering: false,
                },
                addresses,
                port_flags: None,
                tuning: None,
            },
        );
        self
    }

    /// Add an existing bridge device
    pub fn with_bridge(mut self, name: &str, mac: &str, mtu: u32, admin_up: bool) -> Self {
        self.insert_bridge(name, mac, mtu, admin_up);
        self
    }

    /// Turn on VLAN filtering on an existing bridge
    pub fn with_vlan_filtering(mut self, name: &str) -> Self {
        if let Some(link) = self.state.links.get_mut(name) {
            link.state.vlan_filtering = true;
        }
        self
    }

    /// Add a non-bridge virtual link of the given kind
    pub fn with_virtual_link(mut self, name: &str, kind: &str) -> Self {
        self = self.with_ethernet(name, "02:00:00:00:00:99", 1500);
        if let Some(link) = self.state.links.get_mut(name) {
            link.state.kind = Some(kind.to_string());
        }
        self
    }

    /// Assign a global address, with its kernel prefix route
    pub fn with_address(mut self, dev: &str, cidr: &str) -> Self {
        let cidr: IpCidr = cidr.parse().expect("fixture address");
        self.add_address(dev, AddressEntry::global(cidr));
        self
    }

    /// Install a default route; without a gateway it is an IPv6 device-only route
    pub fn with_default_route(mut self, dev: &str, gateway: Option<&str>) -> Self {
        let gateway: Option<IpAddr> = gateway.map(|g| g.parse().expect("fixture gateway"));
        let family = match gateway {
            Some(gw) => Family::of(&gw),
            None => Family::V6,
        };
        self.state.routes.push(SimRoute {
            entry: RouteEntry::default_route(family, gateway, dev),
            kernel: false,
        });
        self
    }

    /// Install a device-only IPv4 default route
    pub fn with_v4_device_default(mut self, dev: &str) -> Self {
        self.state.routes.push(SimRoute {
            entry: RouteEntry::default_route(Family::V4, None, dev),
            kernel: false,
        });
        self
    }

    /// Install an IPv4 default route flagged `onlink`, so the gateway
    /// needs no covering prefix
    pub fn with_onlink_default(mut self, dev: &str, gateway: &str) -> Self {
        let gateway: IpAddr = gateway.parse().expect("fixture gateway");
        self.state.routes.push(SimRoute {
            entry: RouteEntry::default_route(Family::V4, Some(gateway), dev).with_onlink(),
            kernel: false,
        });
        self
    }

    /// Install a static on-link route
    pub fn with_onlink_route(mut self, dev: &str, dst: &str) -> Self {
        let dst: IpCidr = dst.parse().expect("fixture prefix");
        self.state.routes.push(SimRoute {
            entry: RouteEntry::on_link(dst, dev),
            kernel: false,
        });
        self
    }

    /// Make every operation whose command contains `needle` fail with `output`
    pub fn fail_when(mut self, needle: &str, output: &str) -> Self {
        self.failures.push(FailureRule {
            command_contains: needle.to_string(),
            output: output.to_string(),
        });
        self
    }

    /// Clear injected failures
    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Pretend iproute2 is not installed
    pub fn without_tools(mut self) -> Self {
        self.tools_present = false;
        self
    }

    /// Pretend the process is not root
    pub fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }

    /// Complete state, for before/after comparison
    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Commands applied so far, in order
    pub fn applied_commands(&self) -> &[String] {
        &self.applied
    }

    /// Forget applied commands
    pub fn clear_applied(&mut self) {
        self.applied.clear();
    }

    /// Link by name
    pub fn link_state(&self, name: &str) -> Option<&SimLink> {
        self.state.links.get(name)
    }

    /// Migratable (global/site) addresses on `dev`, rendered as CIDR strings
    pub fn global_addresses(&self, dev: &str) -> Vec<String> {
        self.state
            .links
            .get(dev)
            .map(|l| {
                l.addresses
                    .iter()
                    .filter(|a| a.is_migratable())
                    .map(|a| a.cidr.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Non-kernel routes on `dev`
    pub fn routes_on(&self, dev: &str) -> Vec<RouteEntry> {
        self.state
            .routes
            .iter()
            .filter(|r| !r.kernel && r.entry.device == dev)
            .map(|r| r.entry.clone())
            .collect()
    }

    fn insert_bridge(&mut self, name: &str, mac: &str, mtu: u32, admin_up: bool) {
        self.state.links.insert(
            name.to_string(),
            SimLink {
                state: InterfaceState {
                    name: name.to_string(),
                    mac: mac.to_string(),
                    mtu,
                    oper_state: if admin_up { OperState::Up } else { OperState::Down },
                    admin_up,
                    master: None,
                    kind: Some(BRIDGE_KIND.to_string()),
                    vlan_filtering: false,
                },
                addresses: Vec::new(),
                port_flags: None,
                tuning: None,
            },
        );
    }

    fn link_mut(&mut self, op: &NetOp, dev: &str) -> MigrateResult<&mut SimLink> {
        self.state
            .links
            .get_mut(dev)
            .ok_or_else(|| failed(op, ERR_NO_DEVICE))
    }

    fn add_address(&mut self, dev: &str, entry: AddressEntry) {
        if let Some(link) = self.state.links.get_mut(dev) {
            link.addresses.push(entry);
        }
        let max = match entry.family() {
            Family::V4 => 32,
            Family::V6 => 128,
        };
        if entry.is_migratable() && entry.cidr.prefix_len < max {
            self.state.routes.push(SimRoute {
                entry: RouteEntry::on_link(entry.cidr.network(), dev),
                kernel: true,
            });
        }
    }

    /// Drop kernel prefix routes and routes whose gateway lost reachability
    fn prune_routes(&mut self, dev: &str) {
        let covered: Vec<IpCidr> = self
            .state
            .links
            .get(dev)
            .map(|l| l.addresses.iter().map(|a| a.cidr).collect())
            .unwrap_or_default();

        let onlink: Vec<IpCidr> = self
            .state
            .routes
            .iter()
            .filter(|r| r.entry.device == dev && r.entry.kind == RouteKind::OnLink && !r.kernel)
            .filter_map(|r| r.entry.dst)
            .collect();

        self.state.routes.retain(|r| {
            if r.entry.device != dev {
                return true;
            }
            if r.kernel {
                return r
                    .entry
                    .dst
                    .is_some_and(|dst| covered.iter().any(|c| c.network() == dst));
            }
            match r.entry.gateway {
                // an onlink nexthop survives until the device has no address of its family
                Some(gw) if r.entry.onlink => covered.iter().any(|c| c.family() == Family::of(&gw)),
                Some(gw) => gateway_reachable(&gw, &covered, &onlink),
                None => true,
            }
        });
    }

    fn apply_op(&mut self, op: &NetOp) -> MigrateResult<()> {
        match op {
            NetOp::CreateBridge { name } => {
                if self.state.links.contains_key(name) {
                    return Err(failed(op, ERR_FILE_EXISTS));
                }
                let mac = format!("02:42:ac:{:02x}:00:01", self.state.links.len());
                self.insert_bridge(name, &mac, 1500, false);
            }
            NetOp::DisableVlanFiltering { name } => {
                let link = self.link_mut(op, name)?;
                if !link.state.is_bridge() {
                    return Err(failed(op, ERR_NOT_SUPPORTED));
                }
                link.state.vlan_filtering = false;
            }
            NetOp::SetMtu { dev, mtu } => {
                self.link_mut(op, dev)?.state.mtu = *mtu;
            }
            NetOp::SetMac { dev, mac } => {
                self.link_mut(op, dev)?.state.mac = mac.to_ascii_lowercase();
            }
            NetOp::LinkUp { dev } => {
                let link = self.link_mut(op, dev)?;
                link.state.admin_up = true;
                link.state.oper_state = OperState::Up;
                let has_link_local = link.addresses.iter().any(|a| a.scope == AddrScope::Link);
                if !has_link_local {
                    if let Some(cidr) = link_local_for(&link.state.mac) {
                        link.addresses.push(AddressEntry {
                            cidr,
                            scope: AddrScope::Link,
                        });
                    }
                }
            }
            NetOp::AddrDel { dev, cidr } => {
                let link = self.link_mut(op, dev)?;
                let pos = link
                    .addresses
                    .iter()
                    .position(|a| a.cidr == *cidr)
                    .ok_or_else(|| match cidr.family() {
                        Family::V4 => failed(op, ERR_ADDR_NOT_FOUND_V4),
                        Family::V6 => failed(op, ERR_ADDR_NOT_AVAIL),
                    })?;
                let removed = link.addresses.remove(pos);
                if is_primary_v4(&link.addresses[..pos], &removed) {
                    // promote_secondaries=0: the subnet's secondaries go with the primary
                    let network = removed.cidr.network();
                    link.addresses.retain(|a| a.family() != Family::V4 || a.cidr.network() != network);
                }
                self.prune_routes(dev);
            }
            NetOp::AddrAdd { dev, cidr } => {
                let link = self.link_mut(op, dev)?;
                if link.addresses.iter().any(|a| a.cidr == *cidr) {
                    return Err(failed(op, ERR_FILE_EXISTS));
                }
                self.add_address(dev, AddressEntry::global(*cidr));
            }
            NetOp::AddrFlush { dev } => {
                self.link_mut(op, dev)?.addresses.clear();
                self.prune_routes(dev);
            }
            NetOp::RouteDel { route } => {
                let pos = self
                    .state
                    .routes
                    .iter()
                    .position(|r| !r.kernel && r.entry.device == route.device && r.entry.same_target(route))
                    .ok_or_else(|| failed(op, ERR_NO_SUCH_ROUTE))?;
                self.state.routes.remove(pos);
            }
            NetOp::RouteAdd { route } => self.add_route(op, route)?,
            NetOp::SetMaster { dev, master } => {
                let is_bridge = self
                    .state
                    .links
                    .get(master)
                    .ok_or_else(|| failed(op, ERR_NO_DEVICE))?
                    .state
                    .is_bridge();
                if !is_bridge {
                    return Err(failed(op, ERR_NOT_SUPPORTED));
                }
                self.link_mut(op, dev)?.state.master = Some(master.clone());
            }
            NetOp::SetPortFlags { dev, flags } => {
                let link = self.link_mut(op, dev)?;
                if link.state.master.is_none() {
                    return Err(failed(op, ERR_NOT_PORT));
                }
                link.port_flags = Some(*flags);
            }
            NetOp::SetBridgeTuning { name, tuning } => {
                let link = self.link_mut(op, name)?;
                if !link.state.is_bridge() {
                    return Err(failed(op, ERR_NOT_SUPPORTED));
                }
                link.tuning = Some(*tuning);
            }
        }
        Ok(())
    }

    fn add_route(&mut self, op: &NetOp, route: &RouteEntry) -> MigrateResult<()> {
        let link = self
            .state
            .links
            .get(&route.device)
            .ok_or_else(|| failed(op, ERR_NO_DEVICE))?;
        if !link.state.admin_up {
            return Err(failed(op, ERR_NET_DOWN));
        }

        if let Some(gw) = route.gateway.filter(|_| !route.onlink) {
            let covered: Vec<IpCidr> = link.addresses.iter().map(|a| a.cidr).collect();
            let onlink: Vec<IpCidr> = self
                .state
                .routes
                .iter()
                .filter(|r| r.entry.device == route.device && r.entry.kind == RouteKind::OnLink)
                .filter_map(|r| r.entry.dst)
                .collect();
            if !gateway_reachable(&gw, &covered, &onlink) {
                return Err(failed(op, ERR_UNREACHABLE));
            }
        }

        let duplicate = self
            .state
            .routes
            .iter()
            .any(|r| r.entry.device == route.device && r.entry.same_target(route));
        if duplicate {
            return Err(failed(op, ERR_FILE_EXISTS));
        }

        self.state.routes.push(SimRoute {
            entry: route.clone(),
            kernel: false,
        });
        Ok(())
    }
}

/// An IPv4 address is primary when no earlier address shares its subnet
fn is_primary_v4(earlier: &[AddressEntry], entry: &AddressEntry) -> bool {
    entry.family() == Family::V4
        && !earlier
            .iter()
            .any(|a| a.family() == Family::V4 && a.cidr.network() == entry.cidr.network())
}

fn gateway_reachable(gw: &IpAddr, covered: &[IpCidr], onlink: &[IpCidr]) -> bool {
    let link_local = matches!(gw, IpAddr::V6(v6) if v6.segments()[0] & 0xffc0 == 0xfe80);
    link_local
        || covered.iter().any(|c| c.contains(gw))
        || onlink.iter().any(|c| c.contains(gw))
}

#[async_trait]
impl NetBackend for SimulatedHost {
    async fn link(&self, name: &str) -> MigrateResult<Option<InterfaceState>> {
        Ok(self.state.links.get(name).map(|l| l.state.clone()))
    }

    async fn addresses(&self, name: &str) -> MigrateResult<Vec<AddressEntry>> {
        self.state
            .links
            .get(name)
            .map(|l| l.addresses.clone())
            .ok_or_else(|| MigrateError::interface_not_found(name))
    }

    async fn routes(&self, name: &str, family: Family) -> MigrateResult<Vec<RouteEntry>> {
        if !self.state.links.contains_key(name) {
            return Err(MigrateError::interface_not_found(name));
        }
        Ok(self
            .routes_on(name)
            .into_iter()
            .filter(|r| r.family == family)
            .collect())
    }

    async fn preflight(&self, live: bool) -> MigrateResult<()> {
        if !self.tools_present {
            return Err(MigrateError::ToolingUnavailable {
                tool: IP_CMD.to_string(),
            });
        }
        if live && !self.privileged {
            return Err(MigrateError::permission_denied(format!(
                "{} and {} need CAP_NET_ADMIN",
                IP_CMD, BRIDGE_CMD
            )));
        }
        Ok(())
    }

    async fn apply(&mut self, op: &NetOp) -> MigrateResult<()> {
        let cmd = op.to_command();
        if let Some(rule) = self
            .failures
            .iter()
            .find(|r| cmd.contains(&r.command_contains))
        {
            debug!(command = %cmd, "Injected failure");
            return Err(failed(op, &rule.output));
        }

        self.apply_op(op)?;
        self.applied.push(cmd);
        Ok(())
    }
}
