//! Execution mode gate.
//!
//! Every mutating operation passes through [`ExecutionGate::run`]. The gate
//! records the resolved command in its trace in both modes; only live mode
//! hands the operation to the backend.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use brmigrate_common::{MigrateResult, NetBackend, NetOp};

use crate::plan::PlanStep;

/// Whether operations execute or are only traced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecMode {
    /// Apply operations to the host
    Live,
    /// Trace operations without touching the host
    DryRun,
}

impl ExecMode {
    /// Create from the `--dry-run` flag
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            ExecMode::DryRun
        } else {
            ExecMode::Live
        }
    }

    /// Returns true for live mode
    pub fn is_live(&self) -> bool {
        *self == ExecMode::Live
    }
}

/// Wraps mutating calls and keeps the audit trace
#[derive(Debug)]
pub struct ExecutionGate {
    mode: ExecMode,
    trace: Vec<String>,
}

impl ExecutionGate {
    /// Create a gate for `mode`
    pub fn new(mode: ExecMode) -> Self {
        Self {
            mode,
            trace: Vec::new(),
        }
    }

    /// Execution mode
    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Record the header of a step about to run, or of a satisfied one
    pub fn begin_step(&mut self, step: &PlanStep) {
        self.trace.push(step.header());
    }

    /// Execute `op` in live mode; in dry-run mode only trace it.
    ///
    /// A live failure the operation declares benign (deleting an absent
    /// route or address) is logged and reported as success.
    pub async fn run<B>(&mut self, backend: &mut B, op: &NetOp) -> MigrateResult<()>
    where
        B: NetBackend + ?Sized,
    {
        let cmd = op.to_command();
        self.trace.push(cmd.clone());

        if !self.mode.is_live() {
            debug!(command = %cmd, "Dry run: not executing");
            return Ok(());
        }

        match backend.apply(op).await {
            Ok(()) => Ok(()),
            Err(e) if e.command_output().is_some_and(|out| op.is_benign_failure(out)) => {
                warn!(command = %cmd, "Target already absent, continuing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Audit trace: step headers and resolved commands, in order
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Consume the gate, returning its trace
    pub fn into_trace(self) -> Vec<String> {
        self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brmigrate_common::{Family, RouteEntry};
    use brmigrate_test::{single_homed_v4, ETH0};

    fn link_up() -> NetOp {
        NetOp::LinkUp {
            dev: ETH0.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dry_run_traces_without_applying() {
        let mut host = single_homed_v4();
        let before = host.state().clone();
        let mut gate = ExecutionGate::new(ExecMode::DryRun);

        gate.run(&mut host, &link_up()).await.unwrap();

        assert_eq!(gate.trace(), &["/sbin/ip link set dev \"eth0\" up".to_string()]);
        assert!(host.applied_commands().is_empty());
        assert_eq!(host.state(), &before);
    }

    #[tokio::test]
    async fn test_live_applies() {
        let mut host = single_homed_v4();
        let mut gate = ExecutionGate::new(ExecMode::Live);

        gate.run(&mut host, &link_up()).await.unwrap();

        assert_eq!(host.applied_commands(), gate.trace());
    }

    #[tokio::test]
    async fn test_absent_route_delete_is_benign() {
        let mut host = single_homed_v4();
        let mut gate = ExecutionGate::new(ExecMode::Live);
        let op = NetOp::RouteDel {
            route: RouteEntry::default_route(Family::V6, None, ETH0),
        };

        assert!(gate.run(&mut host, &op).await.is_ok());
        assert_eq!(gate.trace().len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_removed_with_primary_is_benign() {
        let mut host = single_homed_v4().with_address(ETH0, "192.168.1.6/24");
        let mut gate = ExecutionGate::new(ExecMode::Live);
        let primary = NetOp::AddrDel {
            dev: ETH0.to_string(),
            cidr: "192.168.1.5/24".parse().unwrap(),
        };
        let secondary = NetOp::AddrDel {
            dev: ETH0.to_string(),
            cidr: "192.168.1.6/24".parse().unwrap(),
        };

        gate.run(&mut host, &primary).await.unwrap();
        assert!(gate.run(&mut host, &secondary).await.is_ok());
        assert_eq!(gate.trace().len(), 2);
    }

    #[tokio::test]
    async fn test_live_failure_propagates() {
        let mut host = single_homed_v4();
        let mut gate = ExecutionGate::new(ExecMode::Live);
        let op = NetOp::LinkUp {
            dev: "eth9".to_string(),
        };

        let err = gate.run(&mut host, &op).await.unwrap_err();
        assert!(err.command_output().unwrap().contains("Cannot find device"));
    }

    #[test]
    fn test_mode_from_flag() {
        assert_eq!(ExecMode::from_dry_run(true), ExecMode::DryRun);
        assert!(ExecMode::from_dry_run(false).is_live());
    }
}
