//! Migrator - snapshot, plan and execute one interface-to-bridge migration
//!
//! Run flow:
//! 1. Preflight the backend (tools present, privilege for live runs)
//! 2. Capture a [`Snapshot`] of the source interface and the bridge
//! 3. Build the [`MigrationPlan`] from the snapshot
//! 4. Execute pending steps in order through the [`ExecutionGate`]
//!
//! The first failing step aborts the run. Nothing already applied is
//! rolled back. Re-running converges for links and addresses because every
//! planner skips targets that already hold. Routes are the exception: the
//! kernel drops a source route once its gateway loses reachability, so the
//! error lists the `ip route add` commands the aborted run never replayed.

use serde::Serialize;
use tracing::{debug, error, info, instrument};

use brmigrate_common::{MigrateError, MigrateResult, NetBackend, NetOp};

use crate::address::{self, plan_addresses};
use crate::bridge::{plan_bridge, BridgeSpec};
use crate::config::MigrationConfig;
use crate::enslave::{self, plan_enslavement};
use crate::gate::{ExecMode, ExecutionGate};
use crate::inspect::Snapshot;
use crate::plan::{MigrationPlan, PlanStep, StepKind};
use crate::route::{self, plan_routes};
use crate::tuning::plan_tuning;

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Mode the run executed in
    pub mode: ExecMode,
    /// The plan that was executed or traced
    pub plan: MigrationPlan,
    /// Gate audit trace
    pub trace: Vec<String>,
}

/// Build the plan for `config` from a captured snapshot.
pub fn build_plan(config: &MigrationConfig, snapshot: &Snapshot) -> MigrateResult<MigrationPlan> {
    if snapshot.source.is_bridge() {
        return Err(MigrateError::invalid_config(
            "iface",
            format!("'{}' is itself a bridge", snapshot.source.name),
        ));
    }

    let spec = BridgeSpec::for_source(config, &snapshot.source);
    let mut plan = MigrationPlan::new(&config.iface, &config.bridge);

    plan.extend(plan_bridge(&spec, snapshot.bridge.as_ref())?);
    plan.extend(plan_addresses(
        &config.iface,
        &config.bridge,
        &snapshot.source_l3,
        &snapshot.bridge_l3,
    ));
    plan.extend(plan_routes(
        &config.bridge,
        &snapshot.source_l3,
        &snapshot.bridge_l3,
    ));
    plan.extend(plan_enslavement(
        &config.bridge,
        &snapshot.source,
        &snapshot.source_l3,
    )?);
    plan.extend(plan_tuning(&config.iface, &spec));

    Ok(plan)
}

/// Drives one migration against a backend
pub struct Migrator<B> {
    config: MigrationConfig,
    backend: B,
}

impl<B: NetBackend> Migrator<B> {
    /// Create a migrator
    pub fn new(config: MigrationConfig, backend: B) -> Self {
        Self { config, backend }
    }

    /// Run configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Consume the migrator, returning the backend
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Capture a snapshot and build the plan without executing anything.
    pub async fn plan(&self) -> MigrateResult<MigrationPlan> {
        let snapshot =
            Snapshot::capture(&self.backend, &self.config.iface, &self.config.bridge).await?;
        build_plan(&self.config, &snapshot)
    }

    /// Run the migration in the configured mode.
    #[instrument(skip(self), fields(iface = %self.config.iface, bridge = %self.config.bridge))]
    pub async fn run(&mut self) -> MigrateResult<MigrationReport> {
        self.config.validate()?;
        self.backend.preflight(self.config.mode.is_live()).await?;

        let plan = self.plan().await?;
        info!(
            mode = ?self.config.mode,
            steps = plan.steps.len(),
            pending = plan.pending().count(),
            "Migration plan ready"
        );

        let mut gate = ExecutionGate::new(self.config.mode);
        for (idx, step) in plan.steps.iter().enumerate() {
            if let Err(err) = execute_step(&mut gate, &mut self.backend, step, &self.config.bridge).await {
                return Err(attach_unreplayed_routes(err, &plan.steps[idx..]));
            }
        }

        info!(
            applied = plan.pending().count(),
            satisfied = plan.satisfied_count(),
            "Migration complete"
        );

        Ok(MigrationReport {
            mode: self.config.mode,
            plan,
            trace: gate.into_trace(),
        })
    }
}

async fn execute_step<B>(
    gate: &mut ExecutionGate,
    backend: &mut B,
    step: &PlanStep,
    bridge: &str,
) -> MigrateResult<()>
where
    B: NetBackend + ?Sized,
{
    gate.begin_step(step);
    if !step.is_pending() {
        debug!(step = %step.kind, subject = %step.subject, "Already satisfied");
        return Ok(());
    }

    for op in &step.ops {
        if let Err(err) = gate.run(backend, op).await {
            let err = classify_failure(step, op, bridge, err);
            error!(step = %step.kind, subject = %step.subject, error = %err, "Step failed");
            return Err(err);
        }
    }

    info!(step = %step.kind, subject = %step.subject, mode = ?gate.mode(), "Step done");
    Ok(())
}

/// Collect route adds from the failed step onward and attach them to `err`.
fn attach_unreplayed_routes(err: MigrateError, remaining: &[PlanStep]) -> MigrateError {
    let routes: Vec<String> = remaining
        .iter()
        .filter(|s| s.is_pending())
        .flat_map(|s| &s.ops)
        .filter(|op| matches!(op, NetOp::RouteAdd { .. }))
        .map(NetOp::to_command)
        .collect();
    if routes.is_empty() {
        return err;
    }

    error!(routes = ?routes, "Routes not replayed onto the bridge");
    err.with_unreplayed_routes(routes)
}

fn classify_failure(step: &PlanStep, op: &NetOp, bridge: &str, err: MigrateError) -> MigrateError {
    match step.kind {
        StepKind::MoveAddress => address::classify_failure(step, op, err),
        StepKind::MoveOnlinkRoute | StepKind::MoveDefaultRoute => {
            route::classify_failure(op, bridge, err)
        }
        StepKind::Enslave => enslave::classify_failure(op, err),
        _ => err,
    }
}
