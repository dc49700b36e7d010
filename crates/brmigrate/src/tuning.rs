//! Steady-state bridge and port parameters.
//!
//! Both steps are declarative and always applied; writing a parameter's
//! current value is a no-op in the kernel.

use brmigrate_common::NetOp;

use crate::bridge::BridgeSpec;
use crate::plan::{PlanStep, StepKind};

/// Plan set-port-flags for `iface` and set-bridge-tuning for the bridge.
pub fn plan_tuning(iface: &str, spec: &BridgeSpec) -> Vec<PlanStep> {
    vec![
        PlanStep::apply(
            StepKind::SetPortFlags,
            iface,
            vec![NetOp::SetPortFlags {
                dev: iface.to_string(),
                flags: spec.port_flags,
            }],
        ),
        PlanStep::apply(
            StepKind::SetBridgeTuning,
            &spec.name,
            vec![NetOp::SetBridgeTuning {
                name: spec.name.clone(),
                tuning: spec.tuning,
            }],
        ),
    ]
}
