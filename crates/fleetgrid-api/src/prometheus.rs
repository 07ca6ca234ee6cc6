//! Prometheus text exposition of a fleet snapshot.

use fleet_core::JobKind;
use fleetgrid_controller::{ConvergenceState, FleetSnapshot};

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} {kind}\n"));
}

/// Render the snapshot as Prometheus text format 0.0.4.
pub fn render_prometheus(snapshot: &FleetSnapshot) -> String {
    let mut out = String::new();
    let ledger = &snapshot.ledger;

    header(
        &mut out,
        "fleetgrid_ticks_total",
        "Ticks completed by the supervisor.",
        "counter",
    );
    out.push_str(&format!("fleetgrid_ticks_total {}\n", snapshot.tick));

    header(&mut out, "fleetgrid_memory_total", "Memory across reachable nodes.", "gauge");
    out.push_str(&format!("fleetgrid_memory_total {}\n", ledger.ledger.total));
    header(&mut out, "fleetgrid_memory_used", "Memory used by running processes.", "gauge");
    out.push_str(&format!("fleetgrid_memory_used {}\n", ledger.ledger.used));
    header(
        &mut out,
        "fleetgrid_memory_reserved",
        "Memory held by outstanding reservations.",
        "gauge",
    );
    out.push_str(&format!("fleetgrid_memory_reserved {}\n", ledger.ledger.reserved));
    header(&mut out, "fleetgrid_memory_budget", "Memory the engine may occupy.", "gauge");
    out.push_str(&format!("fleetgrid_memory_budget {}\n", ledger.budget));
    header(&mut out, "fleetgrid_utilization", "(used + reserved) / total.", "gauge");
    out.push_str(&format!("fleetgrid_utilization {:.4}\n", ledger.utilization()));

    header(&mut out, "fleetgrid_node_free", "Unreserved free memory per node.", "gauge");
    for node in &ledger.ledger.nodes {
        out.push_str(&format!(
            "fleetgrid_node_free{{node=\"{}\"}} {}\n",
            node.node, node.free
        ));
    }

    header(&mut out, "fleetgrid_target_security", "Current security level.", "gauge");
    for t in &snapshot.targets {
        out.push_str(&format!(
            "fleetgrid_target_security{{target=\"{}\"}} {:.3}\n",
            t.target, t.security
        ));
    }

    header(&mut out, "fleetgrid_target_funds_ratio", "funds / funds_max.", "gauge");
    for t in &snapshot.targets {
        let ratio = if t.funds_max > 0.0 { t.funds / t.funds_max } else { 0.0 };
        out.push_str(&format!(
            "fleetgrid_target_funds_ratio{{target=\"{}\"}} {:.4}\n",
            t.target, ratio
        ));
    }

    header(
        &mut out,
        "fleetgrid_target_converged",
        "1 when the target sits at its set-points.",
        "gauge",
    );
    for t in &snapshot.targets {
        let converged = u8::from(t.state == ConvergenceState::Converged);
        out.push_str(&format!(
            "fleetgrid_target_converged{{target=\"{}\"}} {converged}\n",
            t.target
        ));
    }

    header(
        &mut out,
        "fleetgrid_in_flight_threads",
        "Threads in flight per target and kind.",
        "gauge",
    );
    for t in &snapshot.targets {
        for kind in JobKind::ALL {
            out.push_str(&format!(
                "fleetgrid_in_flight_threads{{target=\"{}\",kind=\"{kind}\"}} {}\n",
                t.target,
                t.in_flight.get(kind)
            ));
        }
    }

    // Unknown demand is left out rather than reported as zero.
    header(&mut out, "fleetgrid_demand_threads", "Threads needed per target and kind.", "gauge");
    for t in &snapshot.targets {
        let demand = [(JobKind::Harden, t.demand.harden), (JobKind::Grow, t.demand.grow)];
        for (kind, threads) in demand {
            if let Some(threads) = threads {
                out.push_str(&format!(
                    "fleetgrid_demand_threads{{target=\"{}\",kind=\"{kind}\"}} {threads}\n",
                    t.target
                ));
            }
        }
    }

    let stats = &snapshot.last_tick;
    header(
        &mut out,
        "fleetgrid_tick_launched_threads",
        "Threads launched in the last tick.",
        "gauge",
    );
    for kind in JobKind::ALL {
        out.push_str(&format!(
            "fleetgrid_tick_launched_threads{{kind=\"{kind}\"}} {}\n",
            stats.launched.get(kind)
        ));
    }
    header(
        &mut out,
        "fleetgrid_tick_shortfall_threads",
        "Threads wanted but not placed in the last tick.",
        "gauge",
    );
    for kind in JobKind::ALL {
        out.push_str(&format!(
            "fleetgrid_tick_shortfall_threads{{kind=\"{kind}\"}} {}\n",
            stats.shortfall.get(kind)
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_controller::{ControllerSnapshot, KindCounts, LedgerView};
    use fleetgrid_demand::Demand;
    use fleetgrid_ledger::{LedgerSnapshot, NodeUsage};

    fn test_snapshot() -> FleetSnapshot {
        FleetSnapshot {
            tick: 3,
            ledger: LedgerView {
                ledger: LedgerSnapshot {
                    total: 200,
                    used: 40,
                    reserved: 10,
                    outstanding_reservations: 1,
                    nodes: vec![NodeUsage {
                        node: "rack-1".to_string(),
                        total: 200,
                        used: 40,
                        reserved: 10,
                        free: 150,
                    }],
                },
                budget: 100,
            },
            targets: vec![ControllerSnapshot {
                target: "alpha".to_string(),
                state: ConvergenceState::Converged,
                security: 5.0,
                security_floor: 5.0,
                funds: 2500.0,
                funds_max: 10000.0,
                demand: Demand {
                    harden: Some(0),
                    grow: None,
                },
                in_flight: KindCounts {
                    grow: 12,
                    ..KindCounts::default()
                },
                jobs: 2,
            }],
            ..FleetSnapshot::default()
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&FleetSnapshot::default());
        assert!(output.contains("# TYPE fleetgrid_memory_total gauge"));
        assert!(output.contains("fleetgrid_utilization 0.0000"));
    }

    #[test]
    fn render_single_target() {
        let output = render_prometheus(&test_snapshot());

        assert!(output.contains("fleetgrid_memory_budget 100\n"));
        assert!(output.contains("fleetgrid_utilization 0.2500"));
        assert!(output.contains("fleetgrid_node_free{node=\"rack-1\"} 150"));
        assert!(output.contains("fleetgrid_target_funds_ratio{target=\"alpha\"} 0.2500"));
        assert!(output.contains("fleetgrid_target_converged{target=\"alpha\"} 1"));
        assert!(output.contains("fleetgrid_in_flight_threads{target=\"alpha\",kind=\"grow\"} 12"));
        assert!(output.contains("fleetgrid_demand_threads{target=\"alpha\",kind=\"harden\"} 0"));
        assert!(!output.contains("fleetgrid_demand_threads{target=\"alpha\",kind=\"grow\"}"));
    }
}
