//! iproute2-backed [`NetBackend`].
//!
//! Reads go through `ip -json` and are decoded into typed records, so no
//! gateway or device field is ever recovered by matching text. Writes run
//! the rendered [`NetOp`] command.

use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::{debug, warn};

use brmigrate_common::{
    shell::{self, shellquote, BRIDGE_CMD, IP_CMD},
    AddrScope, AddressEntry, Family, InterfaceState, IpCidr, MigrateError, MigrateResult,
    NetBackend, NetOp, OperState, RouteEntry, RouteKind,
};

/// `ip` stderr for a missing device
const NO_DEVICE_MESSAGE: &str = "does not exist";

/// Routing protocol the kernel assigns to prefix routes derived from addresses
const PROTO_KERNEL: &str = "kernel";

/// IFF_UP as rendered in `ip -json` flags
const FLAG_UP: &str = "UP";

/// RTNH_F_ONLINK as rendered in `ip -json route` flags
const FLAG_ONLINK: &str = "onlink";

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    mtu: u32,
    #[serde(default)]
    operstate: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    master: Option<String>,
    #[serde(default)]
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfo {
    #[serde(default)]
    info_kind: Option<String>,
    #[serde(default)]
    info_data: Option<IpBridgeData>,
}

#[derive(Debug, Deserialize)]
struct IpBridgeData {
    #[serde(default)]
    vlan_filtering: Option<serde_json::Value>,
}

impl IpBridgeData {
    /// `ip` prints the attribute as 0/1; accept a JSON bool as well
    fn vlan_filtering(&self) -> bool {
        match &self.vlan_filtering {
            Some(serde_json::Value::Bool(on)) => *on,
            Some(serde_json::Value::Number(n)) => n.as_u64().is_some_and(|v| v != 0),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpAddrLink {
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    local: IpAddr,
    prefixlen: u8,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpRoute {
    dst: String,
    #[serde(default)]
    gateway: Option<IpAddr>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    metric: Option<u32>,
    #[serde(rename = "type", default)]
    route_type: Option<String>,
    #[serde(default)]
    nexthops: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    flags: Vec<String>,
}

impl From<IpLink> for InterfaceState {
    fn from(link: IpLink) -> Self {
        let admin_up = link.flags.iter().any(|f| f == FLAG_UP);
        let (kind, vlan_filtering) = match link.linkinfo {
            Some(info) => {
                let vlan_filtering = info.info_data.as_ref().is_some_and(IpBridgeData::vlan_filtering);
                (info.info_kind, vlan_filtering)
            }
            None => (None, false),
        };
        InterfaceState {
            name: link.ifname,
            mac: link.address.unwrap_or_default().to_ascii_lowercase(),
            mtu: link.mtu,
            oper_state: link
                .operstate
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(OperState::Unknown),
            admin_up,
            master: link.master,
            kind,
            vlan_filtering,
        }
    }
}

/// Decode `ip -json -details link show dev <name>` output
fn parse_links(query: &str, json: &str) -> MigrateResult<Vec<InterfaceState>> {
    let links: Vec<IpLink> =
        serde_json::from_str(json).map_err(|e| MigrateError::query_parse(query, e.to_string()))?;
    Ok(links.into_iter().map(InterfaceState::from).collect())
}

/// Decode `ip -json address show dev <name>` output
fn parse_addresses(query: &str, json: &str) -> MigrateResult<Vec<AddressEntry>> {
    let links: Vec<IpAddrLink> =
        serde_json::from_str(json).map_err(|e| MigrateError::query_parse(query, e.to_string()))?;

    let mut entries = Vec::new();
    for info in links.into_iter().flat_map(|l| l.addr_info) {
        let cidr = IpCidr::new(info.local, info.prefixlen).ok_or_else(|| {
            MigrateError::query_parse(query, format!("bad prefix length {}", info.prefixlen))
        })?;
        let scope = info
            .scope
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(AddrScope::Global);
        entries.push(AddressEntry { cidr, scope });
    }
    Ok(entries)
}

/// Decode `ip -json -4|-6 route show dev <name>` output
///
/// Kernel prefix routes, multipath routes, non-unicast routes and prefix
/// routes through a gateway are left in place.
fn parse_routes(query: &str, json: &str, device: &str, family: Family) -> MigrateResult<Vec<RouteEntry>> {
    let routes: Vec<IpRoute> =
        serde_json::from_str(json).map_err(|e| MigrateError::query_parse(query, e.to_string()))?;

    let mut entries = Vec::new();
    for route in routes {
        if route.protocol.as_deref() == Some(PROTO_KERNEL) {
            continue;
        }
        if route.nexthops.is_some() {
            warn!(dst = %route.dst, device, "Multipath route not migrated");
            continue;
        }
        if route.route_type.as_deref().is_some_and(|t| t != "unicast") {
            continue;
        }

        let entry = if route.dst == "default" {
            RouteEntry::default_route(family, route.gateway, device)
        } else {
            let dst: IpCidr = route
                .dst
                .parse()
                .map_err(|e: String| MigrateError::query_parse(query, e))?;
            if route.gateway.is_some() {
                warn!(dst = %route.dst, device, "Gatewayed prefix route not migrated");
                continue;
            }
            RouteEntry::on_link(dst, device)
        };

        let entry = match route.metric {
            Some(metric) => entry.with_metric(metric),
            None => entry,
        };
        entries.push(if route.flags.iter().any(|f| f == FLAG_ONLINK) {
            entry.with_onlink()
        } else {
            entry
        });
    }

    debug!(
        device,
        family = family.as_str(),
        defaults = entries.iter().filter(|r| r.kind == RouteKind::Default).count(),
        total = entries.len(),
        "Enumerated routes"
    );
    Ok(entries)
}

/// Backend that queries and configures the host through iproute2
#[derive(Debug, Default)]
pub struct IprouteBackend;

impl IprouteBackend {
    /// Create a new backend
    pub fn new() -> Self {
        Self
    }

    /// Run a query; `Ok(None)` when the device is missing
    async fn query(&self, cmd: &str) -> MigrateResult<Option<String>> {
        let result = shell::exec(cmd).await?;
        if result.success() {
            return Ok(Some(result.stdout));
        }
        if result.stderr.contains(NO_DEVICE_MESSAGE) {
            return Ok(None);
        }
        Err(MigrateError::CommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

#[async_trait]
impl NetBackend for IprouteBackend {
    async fn link(&self, name: &str) -> MigrateResult<Option<InterfaceState>> {
        let cmd = format!("{} -json -details link show dev {}", IP_CMD, shellquote(name));
        match self.query(&cmd).await? {
            Some(json) => Ok(parse_links(&cmd, &json)?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn addresses(&self, name: &str) -> MigrateResult<Vec<AddressEntry>> {
        let cmd = format!("{} -json address show dev {}", IP_CMD, shellquote(name));
        match self.query(&cmd).await? {
            Some(json) => parse_addresses(&cmd, &json),
            None => Err(MigrateError::interface_not_found(name)),
        }
    }

    async fn routes(&self, name: &str, family: Family) -> MigrateResult<Vec<RouteEntry>> {
        let cmd = format!(
            "{} -json {} route show dev {}",
            IP_CMD,
            family.ip_flag(),
            shellquote(name)
        );
        match self.query(&cmd).await? {
            Some(json) if json.is_empty() => Ok(Vec::new()),
            Some(json) => parse_routes(&cmd, &json, name, family),
            None => Err(MigrateError::interface_not_found(name)),
        }
    }

    async fn preflight(&self, live: bool) -> MigrateResult<()> {
        for tool in [IP_CMD, BRIDGE_CMD] {
            if !shell::tool_available(tool) {
                return Err(MigrateError::ToolingUnavailable {
                    tool: tool.to_string(),
                });
            }
        }
        if live && !nix::unistd::geteuid().is_root() {
            return Err(MigrateError::permission_denied(
                "reconfiguring links requires root (CAP_NET_ADMIN)",
            ));
        }
        Ok(())
    }

    async fn apply(&mut self, op: &NetOp) -> MigrateResult<()> {
        debug!(tool = op.tool(), "Applying {}", op);
        shell::exec_or_throw(&op.to_command()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LINK_JSON: &str = r#"[{"ifindex":2,"ifname":"eth0","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],
        "mtu":1500,"qdisc":"fq_codel","operstate":"UP","linkmode":"DEFAULT","group":"default",
        "txqlen":1000,"link_type":"ether","address":"52:54:00:AB:CD:EF","broadcast":"ff:ff:ff:ff:ff:ff"}]"#;

    const BRIDGE_PORT_JSON: &str = r#"[{"ifindex":2,"ifname":"eth0","flags":["BROADCAST","MULTICAST","UP"],
        "mtu":1500,"master":"br0","operstate":"UP","address":"52:54:00:ab:cd:ef",
        "linkinfo":{"info_slave_kind":"bridge","info_slave_data":{"state":"forwarding"}}}]"#;

    const BRIDGE_JSON: &str = r#"[{"ifindex":5,"ifname":"br0","flags":["BROADCAST","MULTICAST"],
        "mtu":1500,"operstate":"DOWN","address":"52:54:00:ab:cd:ef",
        "linkinfo":{"info_kind":"bridge","info_data":{"stp_state":0,"vlan_filtering":0}}}]"#;

    const ADDR_JSON: &str = r#"[{"ifindex":2,"ifname":"eth0","addr_info":[
        {"family":"inet","local":"192.168.1.5","prefixlen":24,"broadcast":"192.168.1.255","scope":"global","label":"eth0"},
        {"family":"inet6","local":"2001:db8::5","prefixlen":64,"scope":"global"},
        {"family":"inet6","local":"fe80::5054:ff:feab:cdef","prefixlen":64,"scope":"link"}]}]"#;

    const ROUTE4_JSON: &str = r#"[
        {"dst":"default","gateway":"192.168.1.1","protocol":"dhcp","prefsrc":"192.168.1.5","metric":100,"flags":[]},
        {"dst":"10.20.0.0/16","scope":"link","protocol":"static","flags":[]},
        {"dst":"172.16.0.0/12","gateway":"192.168.1.254","flags":[]},
        {"dst":"192.168.1.0/24","protocol":"kernel","scope":"link","prefsrc":"192.168.1.5","flags":[]}]"#;

    const ROUTE6_JSON: &str = r#"[
        {"dst":"2001:db8::/64","protocol":"kernel","metric":256,"flags":[],"pref":"medium"},
        {"dst":"fe80::/64","protocol":"kernel","metric":256,"flags":[],"pref":"medium"},
        {"dst":"default","protocol":"static","metric":1024,"flags":[],"pref":"medium"}]"#;

    #[test]
    fn test_parse_link() {
        let links = parse_links("q", LINK_JSON).unwrap();
        assert_eq!(links.len(), 1);
        let link = &links[0];
        assert_eq!(link.name, "eth0");
        assert_eq!(link.mac, "52:54:00:ab:cd:ef");
        assert_eq!(link.mtu, 1500);
        assert_eq!(link.oper_state, OperState::Up);
        assert!(link.admin_up);
        assert!(link.master.is_none());
        assert!(!link.is_bridge());
    }

    #[test]
    fn test_parse_enslaved_link() {
        let link = parse_links("q", BRIDGE_PORT_JSON).unwrap().remove(0);
        assert!(link.is_port_of("br0"));
        assert!(link.kind.is_none());
    }

    #[test]
    fn test_parse_bridge_link() {
        let link = parse_links("q", BRIDGE_JSON).unwrap().remove(0);
        assert!(link.is_bridge());
        assert!(!link.admin_up);
        assert_eq!(link.oper_state, OperState::Down);
        assert!(!link.vlan_filtering);
    }

    #[test]
    fn test_parse_vlan_filtering_bridge() {
        let json = r#"[{"ifindex":6,"ifname":"br0","flags":["BROADCAST","MULTICAST","UP"],
            "mtu":1500,"operstate":"UP","address":"52:54:00:ab:cd:ef",
            "linkinfo":{"info_kind":"bridge","info_data":{"stp_state":0,"vlan_filtering":1,"vlan_protocol":"802.1Q"}}}]"#;
        let link = parse_links("q", json).unwrap().remove(0);
        assert!(link.is_bridge());
        assert!(link.vlan_filtering);

        let plain = parse_links("q", LINK_JSON).unwrap().remove(0);
        assert!(!plain.vlan_filtering);
    }

    #[test]
    fn test_parse_addresses_keeps_kernel_order() {
        let addrs = parse_addresses("q", ADDR_JSON).unwrap();
        let rendered: Vec<String> = addrs.iter().map(|a| a.cidr.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["192.168.1.5/24", "2001:db8::5/64", "fe80::5054:ff:feab:cdef/64"]
        );
        assert_eq!(addrs[2].scope, AddrScope::Link);
        assert_eq!(addrs.iter().filter(|a| a.is_migratable()).count(), 2);
    }

    #[test]
    fn test_parse_addresses_empty_interface() {
        let addrs = parse_addresses("q", r#"[{"ifindex":3,"ifname":"eth1","addr_info":[]}]"#).unwrap();
        assert!(addrs.is_empty());
    }

    #[test]
    fn test_parse_routes_v4() {
        let routes = parse_routes("q", ROUTE4_JSON, "eth0", Family::V4).unwrap();
        assert_eq!(routes.len(), 2);

        assert_eq!(routes[0].kind, RouteKind::Default);
        assert_eq!(routes[0].gateway, Some("192.168.1.1".parse().unwrap()));
        assert_eq!(routes[0].metric, Some(100));
        assert_eq!(routes[0].device, "eth0");

        assert_eq!(routes[1].kind, RouteKind::OnLink);
        assert_eq!(routes[1].destination(), "10.20.0.0/16");
        assert!(routes[1].gateway.is_none());
    }

    #[test]
    fn test_parse_routes_v6_device_only_default() {
        let routes = parse_routes("q", ROUTE6_JSON, "eth0", Family::V6).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].family, Family::V6);
        assert_eq!(routes[0].kind, RouteKind::Default);
        assert!(routes[0].gateway.is_none());
        assert_eq!(routes[0].metric, Some(1024));
    }

    #[test]
    fn test_parse_routes_onlink_gateway() {
        let json = r#"[{"dst":"default","gateway":"10.0.0.1","flags":["onlink"]},
            {"dst":"10.0.0.1","scope":"link","flags":[]}]"#;
        let routes = parse_routes("q", json, "eth0", Family::V4).unwrap();
        assert_eq!(routes.len(), 2);
        assert!(routes[0].onlink);
        assert_eq!(routes[0].to_string(), "default via 10.0.0.1 dev eth0 onlink");
        assert!(!routes[1].onlink);

        let replay = NetOp::RouteAdd {
            route: routes[0].rehomed("br0"),
        };
        assert_eq!(
            replay.to_command(),
            "/sbin/ip -4 route add default via 10.0.0.1 dev \"br0\" onlink"
        );
    }

    #[test]
    fn test_parse_routes_skips_multipath() {
        let json = r#"[{"dst":"default","metric":10,"flags":[],
            "nexthops":[{"gateway":"10.0.0.1","dev":"eth0","weight":1},{"gateway":"10.0.1.1","dev":"eth1","weight":1}]}]"#;
        assert!(parse_routes("q", json, "eth0", Family::V4).unwrap().is_empty());
    }

    #[test]
    fn test_parse_malformed_output() {
        let err = parse_links("ip -json link show", "not json").unwrap_err();
        assert!(matches!(err, MigrateError::QueryParse { .. }));
    }
}
