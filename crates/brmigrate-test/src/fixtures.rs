//! Host fixtures for common interface layouts
//!
//! Every fixture names its physical interface `eth0`.

use crate::host::SimulatedHost;

/// MAC address shared by the fixture interfaces
pub const ETH0_MAC: &str = "52:54:00:ab:cd:ef";

/// Interface every fixture migrates
pub const ETH0: &str = "eth0";

/// `eth0` with one IPv4 address and a default route through a gateway
pub fn single_homed_v4() -> SimulatedHost {
    SimulatedHost::new()
        .with_ethernet(ETH0, ETH0_MAC, 1500)
        .with_address(ETH0, "192.168.1.5/24")
        .with_default_route(ETH0, Some("192.168.1.1"))
}

/// `eth0` with a primary and a secondary IPv4 address in one subnet
pub fn secondary_v4() -> SimulatedHost {
    SimulatedHost::new()
        .with_ethernet(ETH0, ETH0_MAC, 1500)
        .with_address(ETH0, "192.168.1.5/24")
        .with_address(ETH0, "192.168.1.6/24")
        .with_default_route(ETH0, Some("192.168.1.1"))
}

/// `eth0` with a host address and a default whose gateway is flagged `onlink`
pub fn onlink_gateway() -> SimulatedHost {
    SimulatedHost::new()
        .with_ethernet(ETH0, ETH0_MAC, 1500)
        .with_address(ETH0, "10.0.0.5/32")
        .with_onlink_default(ETH0, "10.0.0.1")
}

/// `eth0` with IPv4 and IPv6 addresses, two defaults and a static on-link route
pub fn dual_stack() -> SimulatedHost {
    SimulatedHost::new()
        .with_ethernet(ETH0, ETH0_MAC, 9000)
        .with_address(ETH0, "10.0.0.5/24")
        .with_address(ETH0, "10.0.0.6/24")
        .with_address(ETH0, "2001:db8::5/64")
        .with_onlink_route(ETH0, "172.16.0.0/16")
        .with_default_route(ETH0, Some("10.0.0.1"))
        .with_default_route(ETH0, Some("fe80::1"))
}

/// `eth0` with a SLAAC-style IPv6 address and a device-only default
pub fn slaac_v6() -> SimulatedHost {
    SimulatedHost::new()
        .with_ethernet(ETH0, ETH0_MAC, 1500)
        .with_address(ETH0, "2001:db8:1::5054:ff:feab:cdef/64")
        .with_default_route(ETH0, None)
}

/// `eth0` with a default route that reaches its gateway through a static on-link route
pub fn gateway_via_onlink() -> SimulatedHost {
    SimulatedHost::new()
        .with_ethernet(ETH0, ETH0_MAC, 1500)
        .with_address(ETH0, "192.168.1.5/32")
        .with_onlink_route(ETH0, "10.255.0.0/24")
        .with_default_route(ETH0, Some("10.255.0.1"))
}

/// `eth0` with no addresses beyond its link-local and no routes
pub fn no_l3() -> SimulatedHost {
    SimulatedHost::new().with_ethernet(ETH0, ETH0_MAC, 1500)
}
