//! Bridge provisioning.

use serde::Serialize;
use tracing::{debug, instrument};

use brmigrate_common::{
    BridgeTuning, InterfaceState, MigrateError, MigrateResult, NetOp, PortFlags,
};

use crate::config::MigrationConfig;
use crate::plan::{PlanStep, StepKind};

/// Target shape of the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeSpec {
    /// Bridge name
    pub name: String,
    /// MAC address, mirrored from the source so neighbours see no change
    pub mac: String,
    /// MTU, mirrored from the source
    pub mtu: u32,
    /// Bridge-wide tuning
    pub tuning: BridgeTuning,
    /// Flags for the enslaved port
    pub port_flags: PortFlags,
}

impl BridgeSpec {
    /// Derive the bridge target from the source link and the run configuration
    pub fn for_source(config: &MigrationConfig, source: &InterfaceState) -> Self {
        Self {
            name: config.bridge.clone(),
            mac: source.mac.clone(),
            mtu: source.mtu,
            tuning: config.tuning,
            port_flags: config.port_flags,
        }
    }
}

/// Plan create-bridge, set-mtu, set-mac and bring-up.
///
/// Each step whose target already holds on `existing` is recorded as
/// satisfied. A same-named device that is not a bridge is an error. An
/// existing bridge with VLAN filtering on gets it turned off in place of
/// the create, since an untagged port would otherwise drop its traffic.
#[instrument(skip_all, fields(bridge = %spec.name))]
pub fn plan_bridge(
    spec: &BridgeSpec,
    existing: Option<&InterfaceState>,
) -> MigrateResult<Vec<PlanStep>> {
    if let Some(link) = existing {
        if !link.is_bridge() {
            return Err(MigrateError::NotABridge {
                name: spec.name.clone(),
                kind: link.kind.clone().unwrap_or_else(|| "none".to_string()),
            });
        }
    }

    let name = spec.name.clone();
    let exists = existing.is_some();
    let vlan_filtering = existing.is_some_and(|l| l.vlan_filtering);
    let mtu_ok = existing.is_some_and(|l| l.mtu == spec.mtu);
    let mac_ok = existing.is_some_and(|l| l.mac.eq_ignore_ascii_case(&spec.mac));
    let up_ok = existing.is_some_and(|l| l.admin_up);

    debug!(exists, vlan_filtering, mtu_ok, mac_ok, up_ok, "Bridge state");

    let create = if exists {
        NetOp::DisableVlanFiltering { name: name.clone() }
    } else {
        NetOp::CreateBridge { name: name.clone() }
    };

    Ok(vec![
        PlanStep::unless(exists && !vlan_filtering, StepKind::CreateBridge, &name, vec![create]),
        PlanStep::unless(
            mtu_ok,
            StepKind::SetMtu,
            format!("{} mtu {}", name, spec.mtu),
            vec![NetOp::SetMtu {
                dev: name.clone(),
                mtu: spec.mtu,
            }],
        ),
        PlanStep::unless(
            mac_ok,
            StepKind::SetMac,
            format!("{} address {}", name, spec.mac),
            vec![NetOp::SetMac {
                dev: name.clone(),
                mac: spec.mac.clone(),
            }],
        ),
        PlanStep::unless(
            up_ok,
            StepKind::BringUp,
            &name,
            vec![NetOp::LinkUp { dev: name.clone() }],
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use brmigrate_common::{OperState, BRIDGE_KIND};

    fn source() -> InterfaceState {
        InterfaceState {
            name: "eth0".to_string(),
            mac: "52:54:00:ab:cd:ef".to_string(),
            mtu: 9000,
            oper_state: OperState::Up,
            admin_up: true,
            master: None,
            kind: None,
            vlan_filtering: false,
        }
    }

    fn spec() -> BridgeSpec {
        BridgeSpec::for_source(&MigrationConfig::new("eth0", "br0"), &source())
    }

    fn bridge(mac: &str, mtu: u32, admin_up: bool) -> InterfaceState {
        InterfaceState {
            name: "br0".to_string(),
            mac: mac.to_string(),
            mtu,
            oper_state: OperState::Unknown,
            admin_up,
            master: None,
            kind: Some(BRIDGE_KIND.to_string()),
            vlan_filtering: false,
        }
    }

    #[test]
    fn test_spec_mirrors_source() {
        let spec = spec();
        assert_eq!(spec.name, "br0");
        assert_eq!(spec.mac, "52:54:00:ab:cd:ef");
        assert_eq!(spec.mtu, 9000);
    }

    #[test]
    fn test_absent_bridge_plans_everything() {
        let steps = plan_bridge(&spec(), None).unwrap();
        let kinds: Vec<StepKind> = steps.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::CreateBridge,
                StepKind::SetMtu,
                StepKind::SetMac,
                StepKind::BringUp
            ]
        );
        assert!(steps.iter().all(|s| s.is_pending()));
    }

    #[test]
    fn test_matching_bridge_is_satisfied() {
        let existing = bridge("52:54:00:AB:CD:EF", 9000, true);
        let steps = plan_bridge(&spec(), Some(&existing)).unwrap();
        assert!(steps.iter().all(|s| !s.is_pending()));
    }

    #[test]
    fn test_mac_mismatch_only_resets_mac() {
        let existing = bridge("02:00:00:00:00:01", 9000, true);
        let steps = plan_bridge(&spec(), Some(&existing)).unwrap();
        let pending: Vec<StepKind> = steps.iter().filter(|s| s.is_pending()).map(|s| s.kind).collect();
        assert_eq!(pending, vec![StepKind::SetMac]);
    }

    #[test]
    fn test_vlan_filtering_bridge_only_turns_filtering_off() {
        let mut existing = bridge("52:54:00:ab:cd:ef", 9000, true);
        existing.vlan_filtering = true;
        let steps = plan_bridge(&spec(), Some(&existing)).unwrap();
        let pending: Vec<&PlanStep> = steps.iter().filter(|s| s.is_pending()).collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, StepKind::CreateBridge);
        assert_eq!(
            pending[0].ops,
            vec![NetOp::DisableVlanFiltering {
                name: "br0".to_string()
            }]
        );
    }

    #[test]
    fn test_new_bridge_does_not_touch_vlan_filtering() {
        let steps = plan_bridge(&spec(), None).unwrap();
        assert_eq!(steps[0].ops, vec![NetOp::CreateBridge { name: "br0".to_string() }]);
        assert!(steps
            .iter()
            .flat_map(|s| &s.ops)
            .all(|op| !op.to_command().contains("vlan_filtering")));
    }

    #[test]
    fn test_non_bridge_device_rejected() {
        let mut existing = bridge("52:54:00:ab:cd:ef", 9000, true);
        existing.kind = Some("veth".to_string());
        let err = plan_bridge(&spec(), Some(&existing)).unwrap_err();
        assert!(matches!(err, MigrateError::NotABridge { .. }));
    }
}
