//! Planning pass — the critical section in which reservations are made.

use tracing::debug;

use fleet_core::config::ProgramsConfig;
use fleet_core::{Clock, ExecutionService, JobTemplate, Memory};
use fleetgrid_ledger::{CapacityLedger, ReservationSet};

use crate::error::PlacementResult;
use crate::executor::{LaunchReport, execute};
use crate::merge::merge_placements;
use crate::planner::{PlanOutcome, Placement, plan_up_to_threads};

/// A budgeted planning pass over the shared ledger.
///
/// Every `plan` call draws from the same budget. Placements accumulate
/// until [`PlanningPass::execute`] merges and launches them; anything not
/// launched is released when the pass is dropped.
pub struct PlanningPass<'a> {
    set: ReservationSet<'a>,
    budget: Memory,
    placements: Vec<Placement>,
}

impl<'a> PlanningPass<'a> {
    pub fn new(ledger: &'a mut CapacityLedger, budget: Memory) -> Self {
        Self {
            set: ReservationSet::new(ledger),
            budget,
            placements: Vec::new(),
        }
    }

    pub fn budget(&self) -> Memory {
        self.budget
    }

    pub fn remaining_budget(&self) -> Memory {
        self.budget.saturating_sub(self.set.reserved_memory())
    }

    pub fn ledger(&self) -> &CapacityLedger {
        self.set.ledger()
    }

    pub fn ledger_mut(&mut self) -> &mut CapacityLedger {
        self.set.ledger_mut()
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Threads that `remaining_budget` could still buy for `template`.
    pub fn threads_until_budget(&self, template: &JobTemplate) -> u32 {
        match self.ledger().thread_cost(template.kind) {
            Some(cost) if cost > 0 => {
                (self.remaining_budget() / cost).min(Memory::from(u32::MAX)) as u32
            }
            _ => 0,
        }
    }

    /// Plan up to `requested` threads of `template` within the pass budget.
    pub fn plan(&mut self, template: &JobTemplate, requested: u32) -> PlacementResult<PlanOutcome> {
        let outcome = plan_up_to_threads(&mut self.set, template, requested, self.budget)?;
        self.placements.extend(outcome.placements.iter().cloned());
        Ok(outcome)
    }

    /// Release every placement matching `pred`. Returns the released thread count.
    pub fn rollback_where(&mut self, pred: impl Fn(&Placement) -> bool) -> u32 {
        let mut released = 0;
        let mut kept = Vec::with_capacity(self.placements.len());
        for placement in self.placements.drain(..) {
            if pred(&placement) {
                self.set.release(placement.reservation);
                released += placement.template.threads;
            } else {
                kept.push(placement);
            }
        }
        self.placements = kept;
        if released > 0 {
            debug!(threads = released, "rolled back placements");
        }
        released
    }

    /// Merge accumulated placements and launch them.
    pub fn execute(
        mut self,
        exec: &dyn ExecutionService,
        programs: &ProgramsConfig,
        clock: &dyn Clock,
    ) -> LaunchReport {
        let requests = merge_placements(std::mem::take(&mut self.placements));
        execute(&mut self.set, requests, exec, programs, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{JobKind, Node, SystemClock};
    use fleetgrid_sim::{SimFleet, SimNode, SimTarget};

    fn ledger() -> CapacityLedger {
        let mut ledger = CapacityLedger::new();
        ledger.upsert_node(Node::new("a", 16, 0));
        ledger.upsert_node(Node::new("b", 8, 0));
        ledger.set_thread_cost(JobKind::Harden, 4);
        ledger.set_thread_cost(JobKind::Grow, 4);
        ledger
    }

    #[test]
    fn dropping_pass_releases_everything() {
        let mut ledger = ledger();
        {
            let mut pass = PlanningPass::new(&mut ledger, Memory::MAX);
            pass.plan(&JobTemplate::new(JobKind::Harden, "alpha"), 5).unwrap();
            assert_eq!(pass.ledger().total_reserved(), 20);
        }
        assert_eq!(ledger.total_reserved(), 0);
    }

    #[test]
    fn rollback_where_releases_matching() {
        let mut ledger = ledger();
        let mut pass = PlanningPass::new(&mut ledger, Memory::MAX);
        pass.plan(&JobTemplate::new(JobKind::Harden, "alpha"), 2).unwrap();
        pass.plan(&JobTemplate::new(JobKind::Grow, "alpha"), 1).unwrap();

        let released = pass.rollback_where(|p| p.template.kind == JobKind::Grow);

        assert_eq!(released, 1);
        assert_eq!(pass.placements().len(), 1);
        assert_eq!(pass.ledger().total_reserved(), 8);
    }

    #[test]
    fn threads_until_budget_tracks_reservations() {
        let mut ledger = ledger();
        let mut pass = PlanningPass::new(&mut ledger, 20);
        let template = JobTemplate::new(JobKind::Harden, "alpha");
        assert_eq!(pass.threads_until_budget(&template), 5);
        pass.plan(&template, 2).unwrap();
        assert_eq!(pass.threads_until_budget(&template), 3);
    }

    #[test]
    fn execute_merges_repeated_plans() {
        let fleet = SimFleet::builder()
            .node(SimNode::new("n1", 64).rooted())
            .target(SimTarget::new("alpha"))
            .build();
        let config = fleet_core::FleetConfig::default();
        let mut ledger = CapacityLedger::new();
        ledger.upsert_node(fleet_core::ExecutionService::node(&fleet, "n1").unwrap());
        ledger.set_thread_cost(JobKind::Harden, 2);

        let mut pass = PlanningPass::new(&mut ledger, Memory::MAX);
        let template = JobTemplate::new(JobKind::Harden, "alpha");
        pass.plan(&template, 3).unwrap();
        pass.plan(&template, 4).unwrap();
        let report = pass.execute(&fleet, &config.programs, &SystemClock);

        assert_eq!(report.launched.len(), 1);
        assert_eq!(report.launched[0].threads, 7);
        assert_eq!(ledger.total_reserved(), 0);
        assert_eq!(ledger.node("n1").unwrap().used, 14);
    }
}
