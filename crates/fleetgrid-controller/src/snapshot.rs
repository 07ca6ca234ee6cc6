//! Read-only views published once per tick.

use serde::{Deserialize, Serialize};

use fleet_core::config::ControlMode;
use fleet_core::{Memory, Millis, TargetId};
use fleetgrid_demand::Demand;
use fleetgrid_ledger::LedgerSnapshot;

use crate::convergence::ConvergenceState;
use crate::inflight::KindCounts;

/// Counters for one tick, per controller or summed over the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickStats {
    pub launched: KindCounts,
    /// Placed threads whose launch failed.
    pub failed: KindCounts,
    /// Threads wanted but not placed, launch failures included.
    pub shortfall: KindCounts,
    pub reaped: u32,
    pub stale_evicted: u32,
    pub surplus_evicted: u32,
    /// Allocation was skipped by the memory gate.
    pub gated: bool,
}

impl TickStats {
    pub fn merge(&mut self, other: &TickStats) {
        self.launched.merge(&other.launched);
        self.failed.merge(&other.failed);
        self.shortfall.merge(&other.shortfall);
        self.reaped += other.reaped;
        self.stale_evicted += other.stale_evicted;
        self.surplus_evicted += other.surplus_evicted;
        self.gated |= other.gated;
    }

    pub fn evicted(&self) -> u32 {
        self.stale_evicted + self.surplus_evicted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub target: TargetId,
    pub state: ConvergenceState,
    pub security: f64,
    pub security_floor: f64,
    pub funds: f64,
    pub funds_max: f64,
    pub demand: Demand,
    pub in_flight: KindCounts,
    pub jobs: usize,
}

/// Ledger utilization next to the budget it is held to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerView {
    #[serde(flatten)]
    pub ledger: LedgerSnapshot,
    /// Memory the engine may occupy: `budget_fraction * total`.
    pub budget: Memory,
}

impl LedgerView {
    pub fn utilization(&self) -> f64 {
        if self.ledger.total == 0 {
            return 0.0;
        }
        (self.ledger.used + self.ledger.reserved) as f64 / self.ledger.total as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub tick: u64,
    pub timestamp_ms: Millis,
    pub mode: ControlMode,
    pub ledger: LedgerView,
    pub targets: Vec<ControllerSnapshot>,
    pub last_tick: TickStats,
}

impl FleetSnapshot {
    pub fn target(&self, name: &str) -> Option<&ControllerSnapshot> {
        self.targets.iter().find(|t| t.target == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_merge_sums_and_ors() {
        let mut a = TickStats {
            reaped: 1,
            stale_evicted: 2,
            ..TickStats::default()
        };
        a.launched.harden = 3;
        let mut b = TickStats {
            surplus_evicted: 1,
            gated: true,
            ..TickStats::default()
        };
        b.launched.harden = 4;

        a.merge(&b);

        assert_eq!(a.launched.harden, 7);
        assert_eq!(a.evicted(), 3);
        assert!(a.gated);
    }

    #[test]
    fn ledger_view_serializes_flat() {
        let view = LedgerView {
            ledger: LedgerSnapshot {
                total: 100,
                used: 20,
                reserved: 5,
                ..LedgerSnapshot::default()
            },
            budget: 50,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["total"], 100);
        assert_eq!(json["budget"], 50);
        assert!((view.utilization() - 0.25).abs() < 1e-9);
    }
}
