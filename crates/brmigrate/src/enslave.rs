//! Enslavement: flush residual addresses, attach the source to the bridge.

use tracing::instrument;

use brmigrate_common::{InterfaceState, MigrateError, MigrateResult, NetOp};

use crate::inspect::L3State;
use crate::plan::{PlanStep, StepKind};

/// Plan flush-residual-addresses and enslave.
///
/// The flush is satisfied once the source is already a port of `bridge`
/// and holds nothing worth migrating; link-local addresses the kernel
/// keeps on ports do not count. Enslaving is satisfied when the source is
/// a port of `bridge` and administratively up.
#[instrument(skip(source, source_l3), fields(iface = %source.name))]
pub fn plan_enslavement(
    bridge: &str,
    source: &InterfaceState,
    source_l3: &L3State,
) -> MigrateResult<Vec<PlanStep>> {
    if let Some(master) = source.master.as_deref().filter(|m| *m != bridge) {
        return Err(MigrateError::EnslavementFailed {
            iface: source.name.clone(),
            bridge: bridge.to_string(),
            output: format!("already a port of '{}'", master),
        });
    }

    let iface = source.name.clone();
    let enslaved = source.is_port_of(bridge);
    let residual = source_l3.migratable_addresses().next().is_some();

    Ok(vec![
        PlanStep::unless(
            enslaved && !residual,
            StepKind::FlushResidualAddresses,
            &iface,
            vec![NetOp::AddrFlush { dev: iface.clone() }],
        ),
        PlanStep::unless(
            enslaved && source.admin_up,
            StepKind::Enslave,
            format!("{} master {}", iface, bridge),
            vec![
                NetOp::SetMaster {
                    dev: iface.clone(),
                    master: bridge.to_string(),
                },
                NetOp::LinkUp { dev: iface.clone() },
            ],
        ),
    ])
}

/// Classify a failed master assignment as `EnslavementFailed`.
pub fn classify_failure(op: &NetOp, err: MigrateError) -> MigrateError {
    match (op, err) {
        (NetOp::SetMaster { dev, master }, MigrateError::CommandFailed { output, .. }) => {
            MigrateError::EnslavementFailed {
                iface: dev.clone(),
                bridge: master.clone(),
                output,
            }
        }
        (_, err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brmigrate_common::{AddrScope, AddressEntry, OperState};

    fn eth0(master: Option<&str>, admin_up: bool) -> InterfaceState {
        InterfaceState {
            name: "eth0".to_string(),
            mac: "52:54:00:ab:cd:ef".to_string(),
            mtu: 1500,
            oper_state: OperState::Up,
            admin_up,
            master: master.map(str::to_string),
            kind: None,
            vlan_filtering: false,
        }
    }

    fn link_local_only() -> L3State {
        L3State {
            addresses: vec![AddressEntry {
                cidr: "fe80::5054:ff:feab:cdef/64".parse().unwrap(),
                scope: AddrScope::Link,
            }],
            routes: Vec::new(),
        }
    }

    #[test]
    fn test_fresh_interface_plans_flush_and_enslave() {
        let steps = plan_enslavement("br0", &eth0(None, true), &L3State::default()).unwrap();
        assert!(steps.iter().all(|s| s.is_pending()));
        assert_eq!(steps[1].ops.len(), 2);
        assert_eq!(
            steps[1].ops[0].to_command(),
            "/sbin/ip link set dev \"eth0\" master \"br0\""
        );
    }

    #[test]
    fn test_enslaved_port_is_satisfied_despite_link_local() {
        let steps = plan_enslavement("br0", &eth0(Some("br0"), true), &link_local_only()).unwrap();
        assert!(steps.iter().all(|s| !s.is_pending()));
    }

    #[test]
    fn test_enslaved_but_down_is_reapplied() {
        let steps = plan_enslavement("br0", &eth0(Some("br0"), false), &L3State::default()).unwrap();
        assert!(!steps[0].is_pending());
        assert!(steps[1].is_pending());
    }

    #[test]
    fn test_port_of_other_bridge_rejected() {
        let err = plan_enslavement("br0", &eth0(Some("br9"), true), &L3State::default()).unwrap_err();
        assert!(matches!(err, MigrateError::EnslavementFailed { .. }));
        assert!(err.to_string().contains("br9"));
    }

    #[test]
    fn test_failed_master_classified() {
        let op = NetOp::SetMaster {
            dev: "eth0".to_string(),
            master: "br0".to_string(),
        };
        let err = MigrateError::CommandFailed {
            command: op.to_command(),
            exit_code: 2,
            output: "RTNETLINK answers: Device or resource busy".to_string(),
        };
        assert!(matches!(
            classify_failure(&op, err),
            MigrateError::EnslavementFailed { .. }
        ));
    }
}
