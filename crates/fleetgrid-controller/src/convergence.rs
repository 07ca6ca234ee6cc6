//! Convergence controller — drives one target to its set-points.
//!
//! Every tick, in order:
//!
//! 1. reap exited jobs
//! 2. evict stale jobs (remaining time worse than a fresh launch)
//! 3. recount in-flight threads per kind
//! 4. estimate demand
//! 5. memory gate (owned by the caller when passes are shared)
//! 6. allocate harden, and grow only once harden is covered
//! 7. evict surplus jobs, newest first
//!
//! The supervisor runs steps 1-4 and 7 per controller but shares a single
//! planning pass across controllers for step 6; [`ConvergenceController::tick`]
//! runs the whole sequence for a lone controller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleet_core::config::ProgramsConfig;
use fleet_core::{JobHandle, JobKind, JobTemplate, Memory, TargetId, TargetState};
use fleetgrid_demand::{Demand, DemandEstimator};
use fleetgrid_ledger::CapacityLedger;
use fleetgrid_placement::{LaunchReport, PlanningPass};

use crate::budget::pass_budget;
use crate::error::ControllerResult;
use crate::inflight::{InFlightSet, KindCounts};
use crate::services::Services;
use crate::snapshot::{ControllerSnapshot, TickStats};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    #[default]
    Converging,
    Converged,
}

/// Steps 1-4 of a tick: fresh telemetry, demand, and what is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub target: TargetState,
    pub demand: Demand,
    pub in_flight: KindCounts,
    pub harden_duration: Duration,
    pub grow_duration: Duration,
}

pub struct ConvergenceController {
    target: TargetId,
    state: ConvergenceState,
    in_flight: InFlightSet,
    estimator: DemandEstimator,
    last: Option<Assessment>,
    stats: TickStats,
}

impl ConvergenceController {
    pub fn new(target: impl Into<TargetId>, estimator: DemandEstimator) -> Self {
        let target = target.into();
        Self {
            in_flight: InFlightSet::new(target.clone()),
            target,
            state: ConvergenceState::Converging,
            estimator,
            last: None,
            stats: TickStats::default(),
        }
    }

    /// Start from an adopted in-flight set.
    pub fn with_in_flight(mut self, set: InFlightSet) -> Self {
        self.adopt(set);
        self
    }

    pub fn adopt(&mut self, set: InFlightSet) {
        self.in_flight.extend(set.iter().cloned());
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    pub fn last_assessment(&self) -> Option<&Assessment> {
        self.last.as_ref()
    }

    /// Counters accumulated since the last [`ConvergenceController::begin_tick`].
    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn begin_tick(&mut self) {
        self.stats = TickStats::default();
    }

    /// Steps 1-4.
    pub fn assess(
        &mut self,
        services: &Services,
        ledger: &mut CapacityLedger,
    ) -> ControllerResult<&Assessment> {
        let reaped = self.in_flight.reap(services.exec.as_ref());
        self.stats.reaped += reaped.len() as u32;

        let target = services.telemetry.target_state(&self.target)?;
        self.observe(&target);

        let now = services.clock.now_ms();
        let mut fresh = [Duration::ZERO; 3];
        for (slot, kind) in fresh.iter_mut().zip(JobKind::ALL) {
            *slot = services.telemetry.operation_duration(kind, &self.target)?;
        }
        let fresh_for = |kind: JobKind| fresh[kind as usize];

        let stale = self
            .in_flight
            .take_where(|h| h.remaining(now).is_some_and(|r| r > fresh_for(h.kind())));
        for handle in &stale {
            info!(
                target = %self.target,
                kind = %handle.kind(),
                pid = handle.pid,
                threads = handle.threads,
                "evicting stale job"
            );
            terminate(services, ledger, handle);
        }
        self.stats.stale_evicted += stale.len() as u32;

        // Only grow already in flight raises harden demand.
        let in_flight = self.in_flight.totals();
        let demand = self.estimator.estimate(services.telemetry.as_ref(), &target, in_flight.grow)?;
        debug!(
            target = %self.target,
            harden_in_flight = in_flight.harden,
            grow_in_flight = in_flight.grow,
            ?demand,
            "assessed"
        );

        Ok(self.last.insert(Assessment {
            target,
            demand,
            in_flight,
            harden_duration: fresh_for(JobKind::Harden),
            grow_duration: fresh_for(JobKind::Grow),
        }))
    }

    fn observe(&mut self, target: &TargetState) {
        let next = if target.is_converged() {
            ConvergenceState::Converged
        } else {
            ConvergenceState::Converging
        };
        if next != self.state {
            match next {
                ConvergenceState::Converged => info!(
                    target = %self.target,
                    security = target.security,
                    funds = target.funds,
                    "target converged"
                ),
                ConvergenceState::Converging => info!(
                    target = %self.target,
                    security = target.security,
                    floor = target.security_floor,
                    funds = target.funds,
                    max = target.funds_max,
                    "target left its set-points"
                ),
            }
            self.state = next;
        }
    }

    /// Step 6. Plans into `pass` against the last assessment.
    pub fn allocate(&mut self, pass: &mut PlanningPass<'_>) -> ControllerResult<KindCounts> {
        let mut planned = KindCounts::default();
        let Some(assessment) = self.last.as_ref() else {
            return Ok(planned);
        };

        let (kind, need, duration) = match assessment.demand.harden {
            None => {
                debug!(target = %self.target, "harden demand unknown, holding allocation");
                return Ok(planned);
            }
            Some(need) if assessment.in_flight.harden < need => {
                (JobKind::Harden, need, assessment.harden_duration)
            }
            Some(_) => match assessment.demand.grow {
                Some(need) if assessment.in_flight.grow < need => {
                    (JobKind::Grow, need, assessment.grow_duration)
                }
                _ => return Ok(planned),
            },
        };

        let requested = need - assessment.in_flight.get(kind);
        let template = JobTemplate::new(kind, self.target.clone()).with_expected_duration(duration);
        let outcome = pass.plan(&template, requested)?;
        planned.add(kind, outcome.placed_threads());
        self.stats.shortfall.add(kind, outcome.shortfall);
        Ok(planned)
    }

    /// Take ownership of jobs launched for this target.
    pub fn absorb(&mut self, report: &LaunchReport) {
        for handle in report.launched.iter().filter(|h| h.template.target == self.target) {
            self.stats.launched.add(handle.kind(), handle.threads);
            self.in_flight.push(handle.clone());
        }
        for failed in report
            .failed
            .iter()
            .filter(|f| f.request.template.target == self.target)
        {
            let kind = failed.request.template.kind;
            self.stats.failed.add(kind, failed.request.template.threads);
            self.stats.shortfall.add(kind, failed.request.template.threads);
        }
    }

    /// Step 7.
    pub fn evict_surplus(&mut self, services: &Services, ledger: &mut CapacityLedger) {
        let Some(demand) = self.last.as_ref().map(|a| a.demand) else {
            return;
        };
        for (kind, need) in [(JobKind::Harden, demand.harden), (JobKind::Grow, demand.grow)] {
            let Some(need) = need else {
                continue;
            };
            let surplus = self.in_flight.take_surplus(kind, need);
            for handle in &surplus {
                info!(
                    target = %self.target,
                    kind = %kind,
                    pid = handle.pid,
                    threads = handle.threads,
                    demand = need,
                    "evicting surplus job"
                );
                terminate(services, ledger, handle);
            }
            self.stats.surplus_evicted += surplus.len() as u32;
        }
    }

    /// Reap only. For controllers whose target is no longer selected but
    /// still has jobs running.
    pub fn drain(&mut self, services: &Services) {
        let reaped = self.in_flight.reap(services.exec.as_ref());
        self.stats.reaped += reaped.len() as u32;
    }

    /// Run one full tick with a private planning pass.
    pub fn tick(
        &mut self,
        services: &Services,
        ledger: &mut CapacityLedger,
        programs: &ProgramsConfig,
        budget_fraction: f64,
    ) -> ControllerResult<TickStats> {
        self.begin_tick();
        self.assess(services, ledger)?;

        match pass_budget(ledger, budget_fraction) {
            None => {
                debug!(target = %self.target, "memory gate closed");
                self.stats.gated = true;
            }
            Some(budget) => {
                let report = self.plan_and_launch(services, ledger, programs, budget)?;
                self.absorb(&report);
            }
        }

        // Sized against grow in flight before this launch; see `assess`.
        self.evict_surplus(services, ledger);
        Ok(self.stats)
    }

    fn plan_and_launch(
        &mut self,
        services: &Services,
        ledger: &mut CapacityLedger,
        programs: &ProgramsConfig,
        budget: Memory,
    ) -> ControllerResult<LaunchReport> {
        let mut pass = PlanningPass::new(ledger, budget);
        self.allocate(&mut pass)?;
        Ok(pass.execute(services.exec.as_ref(), programs, services.clock.as_ref()))
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let (security, security_floor, funds, funds_max, demand) = match &self.last {
            Some(a) => (
                a.target.security,
                a.target.security_floor,
                a.target.funds,
                a.target.funds_max,
                a.demand,
            ),
            None => (0.0, 0.0, 0.0, 0.0, Demand::default()),
        };
        ControllerSnapshot {
            target: self.target.clone(),
            state: self.state,
            security,
            security_floor,
            funds,
            funds_max,
            demand,
            in_flight: self.in_flight.totals(),
            jobs: self.in_flight.len(),
        }
    }
}

/// Kill a job the ledger already counts as used.
pub(crate) fn terminate(services: &Services, ledger: &mut CapacityLedger, handle: &JobHandle) {
    if !services.exec.kill(handle.pid) {
        debug!(pid = handle.pid, "job exited before it could be killed");
        return;
    }
    match ledger.thread_cost(handle.kind()) {
        Some(cost) => ledger.note_terminated(&handle.node, cost * Memory::from(handle.threads)),
        None => warn!(kind = %handle.kind(), "no thread cost for killed job"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fleet_core::config::FleetConfig;
    use fleet_core::ExecutionService;
    use fleetgrid_sim::{SimFleet, SimNode, SimTarget};

    fn setup(target: SimTarget) -> (Arc<SimFleet>, Services, CapacityLedger, FleetConfig) {
        let fleet = Arc::new(
            SimFleet::builder()
                .node(SimNode::new("home", 8).rooted())
                .node(SimNode::new("n1", 512).rooted())
                .link("home", "n1")
                .target(target)
                .build(),
        );
        let services = Services::from_backend(fleet.clone());
        let config = FleetConfig::default();
        let mut ledger = CapacityLedger::new();
        ledger
            .refresh(fleet.as_ref(), fleet.as_ref(), &config.programs, &config.topology)
            .unwrap();
        (fleet, services, ledger, config)
    }

    fn controller(name: &str) -> ConvergenceController {
        ConvergenceController::new(name, DemandEstimator::new(1_000_000))
    }

    #[test]
    fn harden_comes_before_grow() {
        // Surplus 1.0 needs 20 harden threads; funds also need growing.
        let (fleet, services, mut ledger, config) =
            setup(SimTarget::new("alpha").with_security(6.0, 5.0));
        let mut c = controller("alpha");

        let stats = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        assert_eq!(stats.launched.harden, 20);
        assert_eq!(stats.launched.grow, 0);
        assert_eq!(fleet.running_threads(JobKind::Harden, "alpha"), 20);
        assert_eq!(c.state(), ConvergenceState::Converging);
    }

    #[test]
    fn grow_follows_once_harden_is_covered() {
        let (fleet, services, mut ledger, config) =
            setup(SimTarget::new("alpha").with_security(6.0, 5.0));
        let mut c = controller("alpha");

        c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();
        let stats = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        assert_eq!(stats.launched.harden, 0);
        assert!(stats.launched.grow > 0);
        assert_eq!(
            fleet.running_threads(JobKind::Grow, "alpha"),
            c.last_assessment().unwrap().demand.grow.unwrap()
        );
    }

    #[test]
    fn converged_target_gets_no_work() {
        let (fleet, services, mut ledger, config) = setup(
            SimTarget::new("alpha")
                .with_security(5.0, 5.0)
                .with_funds(1_000.0, 1_000.0),
        );
        let mut c = controller("alpha");

        let stats = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        assert_eq!(c.state(), ConvergenceState::Converged);
        assert_eq!(stats.launched.total(), 0);
        assert_eq!(fleet.running(), 0);
    }

    #[test]
    fn state_flips_back_when_perturbed() {
        let (fleet, services, mut ledger, config) = setup(
            SimTarget::new("alpha")
                .with_security(5.0, 5.0)
                .with_funds(1_000.0, 1_000.0),
        );
        let mut c = controller("alpha");
        c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();
        assert_eq!(c.state(), ConvergenceState::Converged);

        fleet.set_security("alpha", 5.5);
        c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        assert_eq!(c.state(), ConvergenceState::Converging);
        assert_eq!(fleet.running_threads(JobKind::Harden, "alpha"), 10);
    }

    #[test]
    fn closed_gate_skips_allocation() {
        let (fleet, services, mut ledger, config) =
            setup(SimTarget::new("alpha").with_security(6.0, 5.0));
        let mut c = controller("alpha");

        let stats = c.tick(&services, &mut ledger, &config.programs, 0.0).unwrap();

        assert!(stats.gated);
        assert_eq!(fleet.running(), 0);
        assert_eq!(ledger.total_reserved(), 0);
    }

    #[test]
    fn budget_shortfall_is_reported() {
        let (_fleet, services, mut ledger, config) =
            setup(SimTarget::new("alpha").with_security(6.0, 5.0));
        let mut c = controller("alpha");

        // 0.05 of 512 leaves 25 memory units, 12 threads at cost 2.
        let stats = c.tick(&services, &mut ledger, &config.programs, 0.05).unwrap();

        assert_eq!(stats.launched.harden, 12);
        assert_eq!(stats.shortfall.harden, 8);
    }

    #[test]
    fn failed_launch_is_shortfall_and_replanned() {
        let (fleet, services, mut ledger, config) =
            setup(SimTarget::new("alpha").with_security(6.0, 5.0));
        let mut c = controller("alpha");
        fleet.reject_spawns("n1", true);

        let stats = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        assert_eq!(stats.launched.harden, 0);
        assert_eq!(stats.failed.harden, 20);
        assert_eq!(stats.shortfall.harden, 20);
        assert!(c.in_flight().is_empty());
        assert_eq!(ledger.total_reserved(), 0);
        assert_eq!(ledger.total_used(), 0);

        fleet.reject_spawns("n1", false);
        let stats = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        assert_eq!(stats.failed.total(), 0);
        assert_eq!(stats.launched.harden, 20);
        assert_eq!(fleet.running_threads(JobKind::Harden, "alpha"), 20);
    }

    #[test]
    fn surplus_is_evicted_newest_first() {
        // At the floor, so the first tick is all grow.
        let (fleet, services, mut ledger, config) =
            setup(SimTarget::new("alpha").with_security(5.0, 5.0));
        let mut c = controller("alpha");
        c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();
        let first = c.in_flight().handles(JobKind::Grow)[0].pid;

        // Funds recovered on their own: grow demand drops to 4 threads.
        fleet.set_funds("alpha", 9_000.0);
        let stats = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        // A single 78-thread job cannot be trimmed, so it goes entirely.
        assert_eq!(stats.surplus_evicted, 1);
        assert!(!fleet.is_alive(first));
        assert_eq!(c.in_flight().threads(JobKind::Grow), 0);
        assert!(ledger.is_consistent());
    }

    #[test]
    fn stale_jobs_are_evicted() {
        let (fleet, services, mut ledger, config) =
            setup(SimTarget::new("alpha").with_security(30.0, 5.0));
        let mut c = controller("alpha");
        c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();
        let pid = c.in_flight().handles(JobKind::Harden)[0].pid;

        // Security collapses, so a fresh harden would land much sooner.
        fleet.set_security("alpha", 5.0);
        let stats = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        assert_eq!(stats.stale_evicted, 1);
        assert!(!fleet.is_alive(pid));
    }

    #[test]
    fn adopted_jobs_are_never_stale() {
        let (fleet, services, mut ledger, config) =
            setup(SimTarget::new("alpha").with_security(30.0, 5.0));
        let pid = fleet
            .spawn("n1", &config.programs.harden, 4, &["alpha".to_string()])
            .unwrap();
        let adopted = crate::inflight::adopt(fleet.list_processes("n1").unwrap(), &config.programs);
        let mut c = controller("alpha").with_in_flight(adopted["alpha"].clone());

        fleet.set_security("alpha", 20.0);
        let stats = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap();

        assert_eq!(stats.stale_evicted, 0);
        assert!(fleet.is_alive(pid));
    }

    #[test]
    fn unknown_target_aborts_the_tick() {
        let (_fleet, services, mut ledger, config) = setup(SimTarget::new("alpha"));
        let mut c = controller("ghost");
        let err = c.tick(&services, &mut ledger, &config.programs, 1.0).unwrap_err();
        assert!(matches!(err, crate::error::ControllerError::Service(_)));
        assert_eq!(ledger.total_reserved(), 0);
    }
}
