//! Migration plan: the ordered, immutable list of steps for one run.

use serde::Serialize;
use std::fmt;

use brmigrate_common::NetOp;

/// Abstract step kinds, in the order they appear in a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// Create the bridge device
    CreateBridge,
    /// Set bridge MTU
    SetMtu,
    /// Set bridge MAC
    SetMac,
    /// Bring bridge up
    BringUp,
    /// Move one address from source to bridge
    MoveAddress,
    /// Move one on-link route
    MoveOnlinkRoute,
    /// Move one default route
    MoveDefaultRoute,
    /// Flush whatever is left on the source
    FlushResidualAddresses,
    /// Attach source to bridge
    Enslave,
    /// Port flags on the source
    SetPortFlags,
    /// Bridge-wide parameters
    SetBridgeTuning,
}

impl StepKind {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::CreateBridge => "create-bridge",
            StepKind::SetMtu => "set-mtu",
            StepKind::SetMac => "set-mac",
            StepKind::BringUp => "bring-up",
            StepKind::MoveAddress => "move-address",
            StepKind::MoveOnlinkRoute => "move-onlink-route",
            StepKind::MoveDefaultRoute => "move-default-route",
            StepKind::FlushResidualAddresses => "flush-residual-addresses",
            StepKind::Enslave => "enslave",
            StepKind::SetPortFlags => "set-port-flags",
            StepKind::SetBridgeTuning => "set-bridge-tuning",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a step still has work to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Target state does not hold yet
    Apply,
    /// Target state already holds; recorded, never executed
    Satisfied,
}

/// One step of a migration plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    /// Step kind
    pub kind: StepKind,
    /// What the step acts on (device, address, route)
    pub subject: String,
    /// Kernel operations, executed in order
    pub ops: Vec<NetOp>,
    /// Apply or already satisfied
    pub disposition: Disposition,
}

impl PlanStep {
    /// Create a step that needs applying
    pub fn apply(kind: StepKind, subject: impl Into<String>, ops: Vec<NetOp>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            ops,
            disposition: Disposition::Apply,
        }
    }

    /// Create a step whose target already holds
    pub fn satisfied(kind: StepKind, subject: impl Into<String>, ops: Vec<NetOp>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            ops,
            disposition: Disposition::Satisfied,
        }
    }

    /// Create a step, satisfied when `holds` is true
    pub fn unless(holds: bool, kind: StepKind, subject: impl Into<String>, ops: Vec<NetOp>) -> Self {
        if holds {
            Self::satisfied(kind, subject, ops)
        } else {
            Self::apply(kind, subject, ops)
        }
    }

    /// Returns true if the step will execute
    pub fn is_pending(&self) -> bool {
        self.disposition == Disposition::Apply
    }

    /// Trace header for this step
    pub fn header(&self) -> String {
        match self.disposition {
            Disposition::Apply => format!("# {} {}", self.kind, self.subject),
            Disposition::Satisfied => {
                format!("# {} {} (already satisfied)", self.kind, self.subject)
            }
        }
    }
}

/// Ordered steps for one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    /// Source interface
    pub iface: String,
    /// Target bridge
    pub bridge: String,
    /// Steps in execution order
    pub steps: Vec<PlanStep>,
}

impl MigrationPlan {
    /// Create an empty plan
    pub fn new(iface: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self {
            iface: iface.into(),
            bridge: bridge.into(),
            steps: Vec::new(),
        }
    }

    /// Append steps produced by one component
    pub fn extend(&mut self, steps: impl IntoIterator<Item = PlanStep>) {
        self.steps.extend(steps);
    }

    /// Steps that will execute
    pub fn pending(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.is_pending())
    }

    /// Kinds of the steps that will execute, in order
    pub fn pending_kinds(&self) -> Vec<StepKind> {
        self.pending().map(|s| s.kind).collect()
    }

    /// Number of steps recorded as already satisfied
    pub fn satisfied_count(&self) -> usize {
        self.steps.len() - self.pending().count()
    }

    /// Commands the pending steps run, in order
    pub fn commands(&self) -> Vec<String> {
        self.pending()
            .flat_map(|s| s.ops.iter().map(NetOp::to_command))
            .collect()
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# migrate {} -> {}", self.iface, self.bridge)?;
        for step in &self.steps {
            writeln!(f, "{}", step.header())?;
            if step.is_pending() {
                for op in &step.ops {
                    writeln!(f, "{}", op)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up(dev: &str) -> NetOp {
        NetOp::LinkUp {
            dev: dev.to_string(),
        }
    }

    #[test]
    fn test_step_kind_names() {
        assert_eq!(StepKind::CreateBridge.as_str(), "create-bridge");
        assert_eq!(
            StepKind::FlushResidualAddresses.to_string(),
            "flush-residual-addresses"
        );
    }

    #[test]
    fn test_pending_and_satisfied() {
        let mut plan = MigrationPlan::new("eth0", "br0");
        plan.extend([
            PlanStep::satisfied(StepKind::BringUp, "br0", vec![up("br0")]),
            PlanStep::apply(StepKind::Enslave, "eth0", vec![up("eth0")]),
        ]);

        assert_eq!(plan.pending_kinds(), vec![StepKind::Enslave]);
        assert_eq!(plan.satisfied_count(), 1);
        assert_eq!(plan.commands(), vec!["/sbin/ip link set dev \"eth0\" up"]);
    }

    #[test]
    fn test_unless() {
        assert!(!PlanStep::unless(true, StepKind::SetMtu, "br0", vec![]).is_pending());
        assert!(PlanStep::unless(false, StepKind::SetMtu, "br0", vec![]).is_pending());
    }

    #[test]
    fn test_display_omits_satisfied_commands() {
        let mut plan = MigrationPlan::new("eth0", "br0");
        plan.extend([
            PlanStep::satisfied(StepKind::BringUp, "br0", vec![up("br0")]),
            PlanStep::apply(StepKind::Enslave, "eth0", vec![up("eth0")]),
        ]);
        let text = plan.to_string();

        assert!(text.contains("# bring-up br0 (already satisfied)"));
        assert!(!text.contains("dev \"br0\" up"));
        assert!(text.contains("# enslave eth0\n/sbin/ip link set dev \"eth0\" up"));
    }
}
