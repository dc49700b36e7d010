//! Route migration: re-home on-link and default routes onto the bridge.

use tracing::{debug, instrument};

use brmigrate_common::{MigrateError, NetOp, RouteEntry, RouteKind};

use crate::inspect::L3State;
use crate::plan::{PlanStep, StepKind};

/// Plan one step per source route: on-link routes first, then defaults.
///
/// Each step deletes the source-bound route (absent is benign) and adds
/// the same route on the bridge, keeping gateway and metric. When the
/// bridge already carries an equivalent route the add is skipped.
#[instrument(skip(source, bridge_l3))]
pub fn plan_routes(bridge: &str, source: &L3State, bridge_l3: &L3State) -> Vec<PlanStep> {
    let on_link = source.routes.iter().filter(|r| r.kind == RouteKind::OnLink);
    let defaults = source.routes.iter().filter(|r| r.kind == RouteKind::Default);

    on_link
        .chain(defaults)
        .map(|route| plan_route(bridge, route, bridge_l3))
        .collect()
}

fn plan_route(bridge: &str, route: &RouteEntry, bridge_l3: &L3State) -> PlanStep {
    let kind = match route.kind {
        RouteKind::Default => StepKind::MoveDefaultRoute,
        RouteKind::OnLink => StepKind::MoveOnlinkRoute,
    };
    let target = route.rehomed(bridge);

    let mut ops = vec![NetOp::RouteDel {
        route: route.clone(),
    }];
    if bridge_l3.has_route(&target) {
        debug!(route = %target, family = route.family.as_str(), "Already on bridge, skipping add");
    } else {
        ops.push(NetOp::RouteAdd {
            route: target.clone(),
        });
    }

    PlanStep::apply(kind, format!("{} {}", route.family.as_str(), target), ops)
}

/// Classify a failed route operation as `RouteMigrationFailed`.
pub fn classify_failure(op: &NetOp, bridge: &str, err: MigrateError) -> MigrateError {
    let route = match op {
        NetOp::RouteAdd { route } | NetOp::RouteDel { route } => route,
        _ => return err,
    };
    match err {
        MigrateError::CommandFailed { output, .. } => MigrateError::RouteMigrationFailed {
            route: route.to_string(),
            bridge: bridge.to_string(),
            output,
            unreplayed: Vec::new(),
        },
        err => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brmigrate_common::Family;

    fn gw_default() -> RouteEntry {
        RouteEntry::default_route(Family::V4, Some("192.168.1.1".parse().unwrap()), "eth0")
    }

    #[test]
    fn test_gateway_preserved() {
        let source = L3State {
            addresses: Vec::new(),
            routes: vec![gw_default().with_metric(100)],
        };
        let steps = plan_routes("br0", &source, &L3State::default());

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, StepKind::MoveDefaultRoute);
        match &steps[0].ops[1] {
            NetOp::RouteAdd { route } => {
                assert_eq!(route.device, "br0");
                assert_eq!(route.gateway, Some("192.168.1.1".parse().unwrap()));
                assert_eq!(route.metric, Some(100));
            }
            other => panic!("Expected RouteAdd, got {:?}", other),
        }
    }

    #[test]
    fn test_device_only_default_stays_device_only() {
        let source = L3State {
            addresses: Vec::new(),
            routes: vec![RouteEntry::default_route(Family::V6, None, "eth0")],
        };
        let steps = plan_routes("br0", &source, &L3State::default());
        assert_eq!(
            steps[0].ops[1].to_command(),
            "/sbin/ip -6 route add default dev \"br0\""
        );
    }

    #[test]
    fn test_on_link_before_default() {
        let source = L3State {
            addresses: Vec::new(),
            routes: vec![
                gw_default(),
                RouteEntry::on_link("10.20.0.0/16".parse().unwrap(), "eth0"),
            ],
        };
        let kinds: Vec<StepKind> = plan_routes("br0", &source, &L3State::default())
            .iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(kinds, vec![StepKind::MoveOnlinkRoute, StepKind::MoveDefaultRoute]);
    }

    #[test]
    fn test_route_already_on_bridge_skips_add() {
        let source = L3State {
            addresses: Vec::new(),
            routes: vec![gw_default()],
        };
        let bridge = L3State {
            addresses: Vec::new(),
            routes: vec![gw_default().rehomed("br0")],
        };
        let steps = plan_routes("br0", &source, &bridge);
        assert_eq!(steps[0].ops.len(), 1);
        assert!(matches!(steps[0].ops[0], NetOp::RouteDel { .. }));
    }

    #[test]
    fn test_other_family_on_bridge_does_not_satisfy() {
        let source = L3State {
            addresses: Vec::new(),
            routes: vec![RouteEntry::default_route(Family::V6, None, "eth0")],
        };
        let bridge = L3State {
            addresses: Vec::new(),
            routes: vec![RouteEntry::default_route(Family::V4, None, "br0")],
        };
        let steps = plan_routes("br0", &source, &bridge);
        assert_eq!(steps[0].ops.len(), 2);
    }

    #[test]
    fn test_failed_add_classified() {
        let op = NetOp::RouteAdd {
            route: gw_default().rehomed("br0"),
        };
        let err = MigrateError::CommandFailed {
            command: op.to_command(),
            exit_code: 2,
            output: "RTNETLINK answers: Network is unreachable".to_string(),
        };
        match classify_failure(&op, "br0", err) {
            MigrateError::RouteMigrationFailed { route, bridge, .. } => {
                assert_eq!(route, "default via 192.168.1.1 dev br0");
                assert_eq!(bridge, "br0");
            }
            other => panic!("Expected RouteMigrationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_permission_error_not_reclassified() {
        let op = NetOp::RouteAdd {
            route: gw_default().rehomed("br0"),
        };
        let err = MigrateError::permission_denied("not root");
        assert!(matches!(
            classify_failure(&op, "br0", err),
            MigrateError::PermissionDenied { .. }
        ));
    }
}
