//! Mutating kernel operations and their command-line rendering.
//!
//! A [`NetOp`] is the unit the execution gate either runs or traces. The
//! rendered command is the same in both modes, so a dry-run trace is an
//! exact preview of what a live run executes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shell::{self, shellquote};
use crate::types::{IpCidr, RouteEntry};

/// Kernel answer to deleting a route that does not exist
const ROUTE_ABSENT_MESSAGE: &str = "No such process";

/// Kernel answers to deleting an address that is no longer configured.
/// With `promote_secondaries` off, removing a primary IPv4 address also
/// removes the secondaries of its subnet.
const ADDR_ABSENT_MESSAGES: [&str; 2] = ["Cannot assign requested address", "Address not found"];

/// Steady-state bridge parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTuning {
    /// FDB ageing time in seconds
    pub ageing_time_secs: u32,
    /// STP forward delay in seconds
    pub forward_delay_secs: u32,
    /// Spanning tree enabled
    pub stp: bool,
    /// IGMP/MLD snooping enabled
    pub mcast_snooping: bool,
}

impl Default for BridgeTuning {
    fn default() -> Self {
        Self {
            ageing_time_secs: 300,
            forward_delay_secs: 0,
            stp: false,
            mcast_snooping: true,
        }
    }
}

/// Per-port forwarding flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFlags {
    /// Reflect frames back out the ingress port
    pub hairpin: bool,
    /// Flood unknown unicast
    pub flood: bool,
    /// Flood unknown multicast
    pub mcast_flood: bool,
    /// ARP/ND suppression
    pub neigh_suppress: bool,
    /// Source MAC learning
    pub learning: bool,
}

impl Default for PortFlags {
    fn default() -> Self {
        Self {
            hairpin: false,
            flood: true,
            mcast_flood: true,
            neigh_suppress: false,
            learning: true,
        }
    }
}

/// A single mutating kernel operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum NetOp {
    /// Create a bridge with STP off
    CreateBridge { name: String },
    /// Turn off VLAN filtering on an existing bridge
    DisableVlanFiltering { name: String },
    /// Set link MTU
    SetMtu { dev: String, mtu: u32 },
    /// Set link MAC address
    SetMac { dev: String, mac: String },
    /// Bring link administratively up
    LinkUp { dev: String },
    /// Remove an address from a link
    AddrDel { dev: String, cidr: IpCidr },
    /// Add an address to a link
    AddrAdd { dev: String, cidr: IpCidr },
    /// Remove every address from a link
    AddrFlush { dev: String },
    /// Delete a route; an absent route is not an error
    RouteDel { route: RouteEntry },
    /// Add a route
    RouteAdd { route: RouteEntry },
    /// Attach a link to a bridge
    SetMaster { dev: String, master: String },
    /// Set bridge port flags
    SetPortFlags { dev: String, flags: PortFlags },
    /// Set bridge-wide parameters
    SetBridgeTuning { name: String, tuning: BridgeTuning },
}

impl NetOp {
    /// Renders the fully-resolved command line.
    pub fn to_command(&self) -> String {
        match self {
            NetOp::CreateBridge { name } => build_create_bridge_cmd(name),
            NetOp::DisableVlanFiltering { name } => build_disable_vlan_filtering_cmd(name),
            NetOp::SetMtu { dev, mtu } => build_set_mtu_cmd(dev, *mtu),
            NetOp::SetMac { dev, mac } => build_set_mac_cmd(dev, mac),
            NetOp::LinkUp { dev } => build_link_up_cmd(dev),
            NetOp::AddrDel { dev, cidr } => build_addr_cmd("del", dev, cidr),
            NetOp::AddrAdd { dev, cidr } => build_addr_cmd("add", dev, cidr),
            NetOp::AddrFlush { dev } => build_addr_flush_cmd(dev),
            NetOp::RouteDel { route } => build_route_cmd("del", route),
            NetOp::RouteAdd { route } => build_route_cmd("add", route),
            NetOp::SetMaster { dev, master } => build_set_master_cmd(dev, master),
            NetOp::SetPortFlags { dev, flags } => build_port_flags_cmd(dev, flags),
            NetOp::SetBridgeTuning { name, tuning } => build_bridge_tuning_cmd(name, tuning),
        }
    }

    /// Tool the rendered command runs
    pub fn tool(&self) -> &'static str {
        match self {
            NetOp::SetPortFlags { .. } => shell::BRIDGE_CMD,
            _ => shell::IP_CMD,
        }
    }

    /// Returns true if a failure with `output` means the target was already gone.
    pub fn is_benign_failure(&self, output: &str) -> bool {
        match self {
            NetOp::RouteDel { .. } => output.contains(ROUTE_ABSENT_MESSAGE),
            NetOp::AddrDel { .. } => ADDR_ABSENT_MESSAGES.iter().any(|m| output.contains(m)),
            _ => false,
        }
    }
}

impl fmt::Display for NetOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command())
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Build bridge creation command
///
/// VLAN filtering is left at the kernel default (off); naming it here
/// fails on kernels built without bridge VLAN support.
pub fn build_create_bridge_cmd(name: &str) -> String {
    format!("{} link add {} type bridge stp_state 0", shell::IP_CMD, shellquote(name))
}

/// Build command turning off VLAN filtering on a bridge
pub fn build_disable_vlan_filtering_cmd(name: &str) -> String {
    format!(
        "{} link set dev {} type bridge vlan_filtering 0",
        shell::IP_CMD,
        shellquote(name)
    )
}

/// Build set MTU command
pub fn build_set_mtu_cmd(dev: &str, mtu: u32) -> String {
    format!("{} link set dev {} mtu {}", shell::IP_CMD, shellquote(dev), mtu)
}

/// Build set MAC address command
pub fn build_set_mac_cmd(dev: &str, mac: &str) -> String {
    format!(
        "{} link set dev {} address {}",
        shell::IP_CMD,
        shellquote(dev),
        shellquote(mac)
    )
}

/// Build link up command
pub fn build_link_up_cmd(dev: &str) -> String {
    format!("{} link set dev {} up", shell::IP_CMD, shellquote(dev))
}

/// Build address add/del command
pub fn build_addr_cmd(op: &str, dev: &str, cidr: &IpCidr) -> String {
    format!(
        "{} {} address {} {} dev {}",
        shell::IP_CMD,
        cidr.family().ip_flag(),
        op,
        cidr,
        shellquote(dev)
    )
}

/// Build address flush command
pub fn build_addr_flush_cmd(dev: &str) -> String {
    format!("{} address flush dev {}", shell::IP_CMD, shellquote(dev))
}

/// Build route add/del command
///
/// Metric and `onlink` are only rendered for `add`; deleting by
/// destination, gateway and device removes the route whatever its metric.
pub fn build_route_cmd(op: &str, route: &RouteEntry) -> String {
    let mut cmd = format!(
        "{} {} route {} {}",
        shell::IP_CMD,
        route.family.ip_flag(),
        op,
        route.destination()
    );
    if let Some(gw) = route.gateway {
        cmd.push_str(&format!(" via {}", gw));
    }
    cmd.push_str(&format!(" dev {}", shellquote(&route.device)));
    if op == "add" {
        if let Some(metric) = route.metric {
            cmd.push_str(&format!(" metric {}", metric));
        }
        if route.onlink {
            cmd.push_str(" onlink");
        }
    }
    cmd
}

/// Build enslave command
pub fn build_set_master_cmd(dev: &str, master: &str) -> String {
    format!(
        "{} link set dev {} master {}",
        shell::IP_CMD,
        shellquote(dev),
        shellquote(master)
    )
}

/// Build bridge port flags command
pub fn build_port_flags_cmd(dev: &str, flags: &PortFlags) -> String {
    format!(
        "{} link set dev {} hairpin {} flood {} mcast_flood {} neigh_suppress {} learning {}",
        shell::BRIDGE_CMD,
        shellquote(dev),
        on_off(flags.hairpin),
        on_off(flags.flood),
        on_off(flags.mcast_flood),
        on_off(flags.neigh_suppress),
        on_off(flags.learning)
    )
}

/// Build bridge tuning command
///
/// `ip` takes ageing time and forward delay in centiseconds.
pub fn build_bridge_tuning_cmd(name: &str, tuning: &BridgeTuning) -> String {
    format!(
        "{} link set dev {} type bridge ageing_time {} forward_delay {} stp_state {} mcast_snooping {}",
        shell::IP_CMD,
        shellquote(name),
        tuning.ageing_time_secs * 100,
        tuning.forward_delay_secs * 100,
        u8::from(tuning.stp),
        u8::from(tuning.mcast_snooping)
    )
}
