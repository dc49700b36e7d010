//! Address migration: delete from the source, then add to the bridge.

use tracing::{debug, instrument};

use brmigrate_common::{MigrateError, NetOp};

use crate::inspect::L3State;
use crate::plan::{PlanStep, StepKind};

/// Plan one move-address step per migratable source address.
///
/// The delete always precedes the add so the address never sits on two
/// devices at once. An address the bridge already holds is only deleted
/// from the source.
#[instrument(skip(source, bridge_l3))]
pub fn plan_addresses(
    iface: &str,
    bridge: &str,
    source: &L3State,
    bridge_l3: &L3State,
) -> Vec<PlanStep> {
    source
        .migratable_addresses()
        .map(|entry| {
            let mut ops = vec![NetOp::AddrDel {
                dev: iface.to_string(),
                cidr: entry.cidr,
            }];
            if bridge_l3.has_address(entry) {
                debug!(address = %entry.cidr, "Already on bridge, only removing from source");
            } else {
                ops.push(NetOp::AddrAdd {
                    dev: bridge.to_string(),
                    cidr: entry.cidr,
                });
            }
            PlanStep::apply(StepKind::MoveAddress, entry.cidr.to_string(), ops)
        })
        .collect()
}

/// Classify a failed move-address operation.
///
/// A failed add after a successful delete leaves the address orphaned.
pub fn classify_failure(step: &PlanStep, op: &NetOp, err: MigrateError) -> MigrateError {
    let source_iface = step.ops.iter().find_map(|o| match o {
        NetOp::AddrDel { dev, .. } => Some(dev.clone()),
        _ => None,
    });

    match (op, source_iface, err) {
        (NetOp::AddrAdd { dev, cidr }, Some(source_iface), MigrateError::CommandFailed { output, .. }) => {
            MigrateError::AddressMigrationIncomplete {
                address: cidr.to_string(),
                source_iface,
                bridge: dev.clone(),
                output,
                unreplayed: Vec::new(),
            }
        }
        (_, _, err) => err,
    }
}
