//! Typed snapshot records for links, addresses and routes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Link kind reported by the kernel for bridge devices.
pub const BRIDGE_KIND: &str = "bridge";

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl Family {
    /// Both families, in replay order.
    pub const ALL: [Family; 2] = [Family::V4, Family::V6];

    /// Family of an IP address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    /// `ip` family selector flag
    pub fn ip_flag(&self) -> &'static str {
        match self {
            Family::V4 => "-4",
            Family::V6 => "-6",
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::V4 => "ipv4",
            Family::V6 => "ipv6",
        }
    }
}

/// Operational state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperState {
    /// Carrier up
    Up,
    /// Carrier down
    Down,
    /// Anything else the kernel reports (UNKNOWN, DORMANT, ...)
    Unknown,
}

impl FromStr for OperState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "UP" => OperState::Up,
            "DOWN" | "LOWERLAYERDOWN" => OperState::Down,
            _ => OperState::Unknown,
        })
    }
}

/// Address scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddrScope {
    /// Globally routable
    Global,
    /// Site-local
    Site,
    /// Link-local
    Link,
    /// Host (loopback)
    Host,
}

impl FromStr for AddrScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "site" => AddrScope::Site,
            "link" => AddrScope::Link,
            "host" => AddrScope::Host,
            _ => AddrScope::Global,
        })
    }
}

/// IP address with prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpCidr {
    /// Address
    pub addr: IpAddr,
    /// Prefix length
    pub prefix_len: u8,
}

impl IpCidr {
    /// Create a new IpCidr, rejecting prefix lengths wider than the family allows
    pub fn new(addr: IpAddr, prefix_len: u8) -> Option<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (prefix_len <= max).then_some(Self { addr, prefix_len })
    }

    /// Address family
    pub fn family(&self) -> Family {
        Family::of(&self.addr)
    }

    /// Returns true if `ip` falls inside this prefix
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix_len as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix_len as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }

    /// The prefix with host bits cleared
    pub fn network(&self) -> IpCidr {
        let addr = match self.addr {
            IpAddr::V4(a) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix_len as u32).unwrap_or(0);
                IpAddr::V4((u32::from(a) & mask).into())
            }
            IpAddr::V6(a) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix_len as u32).unwrap_or(0);
                IpAddr::V6((u128::from(a) & mask).into())
            }
        };
        IpCidr {
            addr,
            prefix_len: self.prefix_len,
        }
    }
}

impl fmt::Display for IpCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for IpCidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|e| format!("invalid address '{}': {}", addr, e))?;
        let prefix_len = match len {
            Some(len) => len
                .parse::<u8>()
                .map_err(|e| format!("invalid prefix length '{}': {}", len, e))?,
            None if addr.is_ipv4() => 32,
            None => 128,
        };
        IpCidr::new(addr, prefix_len).ok_or_else(|| format!("prefix length out of range in '{}'", s))
    }
}

/// Snapshot of a live link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceState {
    /// Interface name
    pub name: String,
    /// MAC address, lowercase colon-separated
    pub mac: String,
    /// MTU
    pub mtu: u32,
    /// Operational state
    pub oper_state: OperState,
    /// Administratively up (IFF_UP)
    pub admin_up: bool,
    /// Controller device, when enslaved
    pub master: Option<String>,
    /// Link kind (`bridge`, `veth`, ...); `None` for plain hardware links
    pub kind: Option<String>,
    /// Bridge VLAN filtering; always false for non-bridges
    #[serde(default)]
    pub vlan_filtering: bool,
}

impl InterfaceState {
    /// Returns true if the link is a bridge device
    pub fn is_bridge(&self) -> bool {
        self.kind.as_deref() == Some(BRIDGE_KIND)
    }

    /// Returns true if the link is a port of `bridge`
    pub fn is_port_of(&self, bridge: &str) -> bool {
        self.master.as_deref() == Some(bridge)
    }
}

/// An address configured on an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Address with prefix length
    pub cidr: IpCidr,
    /// Scope
    pub scope: AddrScope,
}

impl AddressEntry {
    /// Create a global-scope address entry
    pub fn global(cidr: IpCidr) -> Self {
        Self {
            cidr,
            scope: AddrScope::Global,
        }
    }

    /// Address family
    pub fn family(&self) -> Family {
        self.cidr.family()
    }

    /// Link-local and host-scoped addresses are regenerated by the kernel
    /// and never move between devices.
    pub fn is_migratable(&self) -> bool {
        matches!(self.scope, AddrScope::Global | AddrScope::Site)
    }
}

/// Route kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteKind {
    /// Default route, with or without gateway
    Default,
    /// Connected route to a prefix
    OnLink,
}

/// A route whose egress device is an interface of interest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Address family
    pub family: Family,
    /// Route kind
    pub kind: RouteKind,
    /// Destination prefix (`None` for default routes)
    pub dst: Option<IpCidr>,
    /// Next hop (`None` for device-only routes)
    pub gateway: Option<IpAddr>,
    /// Egress device
    pub device: String,
    /// Route metric
    pub metric: Option<u32>,
    /// Gateway is on the link even though no local prefix covers it
    #[serde(default)]
    pub onlink: bool,
}

impl RouteEntry {
    /// Create a default route
    pub fn default_route(family: Family, gateway: Option<IpAddr>, device: impl Into<String>) -> Self {
        Self {
            family,
            kind: RouteKind::Default,
            dst: None,
            gateway,
            device: device.into(),
            metric: None,
            onlink: false,
        }
    }

    /// Create an on-link route
    pub fn on_link(dst: IpCidr, device: impl Into<String>) -> Self {
        Self {
            family: dst.family(),
            kind: RouteKind::OnLink,
            dst: Some(dst),
            gateway: None,
            device: device.into(),
            metric: None,
            onlink: false,
        }
    }

    /// Set the metric
    pub fn with_metric(mut self, metric: u32) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Mark the gateway as on-link
    pub fn with_onlink(mut self) -> Self {
        self.onlink = true;
        self
    }

    /// Destination as `ip route` expects it
    pub fn destination(&self) -> String {
        match self.dst {
            Some(dst) => dst.to_string(),
            None => "default".to_string(),
        }
    }

    /// The same route bound to another device
    pub fn rehomed(&self, device: &str) -> RouteEntry {
        RouteEntry {
            device: device.to_string(),
            ..self.clone()
        }
    }

    /// Returns true if both routes send the same traffic to the same next hop,
    /// regardless of device and metric.
    pub fn same_target(&self, other: &RouteEntry) -> bool {
        self.family == other.family
            && self.kind == other.kind
            && self.dst == other.dst
            && self.gateway == other.gateway
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination())?;
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        write!(f, " dev {}", self.device)?;
        if let Some(metric) = self.metric {
            write!(f, " metric {}", metric)?;
        }
        if self.onlink {
            write!(f, " onlink")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_parse_and_display() {
        let cidr: IpCidr = "192.168.1.5/24".parse().unwrap();
        assert_eq!(cidr.prefix_len, 24);
        assert_eq!(cidr.family(), Family::V4);
        assert_eq!(cidr.to_string(), "192.168.1.5/24");

        let host: IpCidr = "2001:db8::1".parse().unwrap();
        assert_eq!(host.prefix_len, 128);

        assert!("10.0.0.1/33".parse::<IpCidr>().is_err());
        assert!("nonsense/8".parse::<IpCidr>().is_err());
    }

    #[test]
    fn test_cidr_contains() {
        let cidr: IpCidr = "192.168.1.5/24".parse().unwrap();
        assert!(cidr.contains(&"192.168.1.1".parse().unwrap()));
        assert!(!cidr.contains(&"192.168.2.1".parse().unwrap()));
        assert!(!cidr.contains(&"fe80::1".parse().unwrap()));

        let v6: IpCidr = "2001:db8:1::10/64".parse().unwrap();
        assert!(v6.contains(&"2001:db8:1::1".parse().unwrap()));
        assert_eq!(v6.network().to_string(), "2001:db8:1::/64");

        let any: IpCidr = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_oper_state_from_str() {
        assert_eq!("UP".parse::<OperState>().unwrap(), OperState::Up);
        assert_eq!("DOWN".parse::<OperState>().unwrap(), OperState::Down);
        assert_eq!("UNKNOWN".parse::<OperState>().unwrap(), OperState::Unknown);
    }

    #[test]
    fn test_address_migratable() {
        let global = AddressEntry::global("10.0.0.2/8".parse().unwrap());
        assert!(global.is_migratable());

        let link_local = AddressEntry {
            cidr: "fe80::1/64".parse().unwrap(),
            scope: AddrScope::Link,
        };
        assert!(!link_local.is_migratable());
    }

    #[test]
    fn test_address_entries_dedupe_in_hash_set() {
        let cidr: IpCidr = "192.168.1.5/24".parse().unwrap();
        let set: std::collections::HashSet<AddressEntry> =
            [AddressEntry::global(cidr), AddressEntry::global(cidr)]
                .into_iter()
                .collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_route_display_and_rehome() {
        let route = RouteEntry::default_route(
            Family::V4,
            Some("192.168.1.1".parse().unwrap()),
            "eth0",
        )
        .with_metric(100);
        assert_eq!(route.to_string(), "default via 192.168.1.1 dev eth0 metric 100");

        let moved = route.rehomed("br0");
        assert_eq!(moved.device, "br0");
        assert!(moved.same_target(&route));

        let slaac = RouteEntry::default_route(Family::V6, None, "eth0");
        assert_eq!(slaac.to_string(), "default dev eth0");
        assert!(!slaac.same_target(&route));
    }

    #[test]
    fn test_onlink_route_keeps_flag_when_rehomed() {
        let route = RouteEntry::default_route(Family::V4, Some("10.0.0.1".parse().unwrap()), "eth0")
            .with_onlink();
        assert_eq!(route.to_string(), "default via 10.0.0.1 dev eth0 onlink");

        let moved = route.rehomed("br0");
        assert!(moved.onlink);
        assert_eq!(moved.to_string(), "default via 10.0.0.1 dev br0 onlink");
    }
}
