//! Supervisor — the global control loop.
//!
//! One loop iterates every selected target. Each tick holds the shared
//! ledger for its whole duration, so planning passes never interleave,
//! and opens exactly one planning pass in which targets reserve in
//! ranking order. Later targets may be starved by earlier ones; that is
//! ordinary back-pressure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use fleet_core::config::{ControlMode, FleetConfig};
use fleet_core::{JobKind, TargetId};
use fleetgrid_demand::{DemandEstimator, best_by_yield, candidates, select};
use fleetgrid_ledger::CapacityLedger;
use fleetgrid_placement::PlanningPass;

use crate::batch::{BatchTiming, plan_batch};
use crate::budget::{allowed_memory, pass_budget};
use crate::convergence::{ConvergenceController, ConvergenceState, terminate};
use crate::error::ControllerResult;
use crate::inflight::{InFlightSet, adopt};
use crate::services::Services;
use crate::snapshot::{ControllerSnapshot, FleetSnapshot, LedgerView, TickStats};

/// The ledger shared by every controller in the process.
pub type SharedLedger = Arc<Mutex<CapacityLedger>>;

pub struct Supervisor {
    services: Services,
    config: FleetConfig,
    ledger: SharedLedger,
    estimator: DemandEstimator,
    controllers: BTreeMap<TargetId, ConvergenceController>,
    batches: BTreeMap<TargetId, InFlightSet>,
    tick: u64,
    snapshots: watch::Sender<FleetSnapshot>,
}

impl Supervisor {
    pub fn new(services: Services, config: FleetConfig) -> Self {
        let (snapshots, _) = watch::channel(FleetSnapshot {
            mode: config.controller.mode,
            ..FleetSnapshot::default()
        });
        Self {
            estimator: DemandEstimator::new(config.controller.max_search_threads),
            services,
            config,
            ledger: Arc::new(Mutex::new(CapacityLedger::new())),
            controllers: BTreeMap::new(),
            batches: BTreeMap::new(),
            tick: 0,
            snapshots,
        }
    }

    /// Share an existing ledger instead of a private one.
    pub fn with_ledger(mut self, ledger: SharedLedger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn controller(&self, target: &str) -> Option<&ConvergenceController> {
        self.controllers.get(target)
    }

    pub fn batch_jobs(&self, target: &str) -> Option<&InFlightSet> {
        self.batches.get(target)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Adopt jobs already running on reachable nodes. Returns how many.
    pub fn recover(&mut self) -> ControllerResult<usize> {
        let topology = self.services.topology.as_ref();
        let mut processes = Vec::new();
        for node in topology.list_reachable_nodes(&self.config.topology.root, &[])? {
            if topology.has_execution_rights(&node)? {
                processes.extend(self.services.exec.list_processes(&node)?);
            }
        }

        let mut adopted = 0;
        for (target, set) in adopt(processes, &self.config.programs) {
            adopted += set.len();
            match self.config.controller.mode {
                ControlMode::Converge => {
                    let estimator = self.estimator;
                    self.controllers
                        .entry(target.clone())
                        .or_insert_with(|| ConvergenceController::new(target, estimator))
                        .adopt(set);
                }
                ControlMode::Batch => {
                    self.batches
                        .entry(target.clone())
                        .or_insert_with(|| InFlightSet::new(target))
                        .extend(set.iter().cloned());
                }
            }
        }

        if adopted > 0 {
            info!(jobs = adopted, "recovered running jobs");
        }
        Ok(adopted)
    }

    /// One control tick in the configured mode, then publish a snapshot.
    pub async fn tick(&mut self) -> ControllerResult<TickStats> {
        let ledger = self.ledger.clone();
        let mut ledger = ledger.lock().await;
        ledger.refresh(
            self.services.exec.as_ref(),
            self.services.topology.as_ref(),
            &self.config.programs,
            &self.config.topology,
        )?;

        let stats = match self.config.controller.mode {
            ControlMode::Converge => self.converge_tick(&mut ledger)?,
            ControlMode::Batch => self.batch_tick(&mut ledger)?,
        };

        debug_assert!(ledger.is_consistent());
        self.publish(&ledger, stats);
        Ok(stats)
    }

    fn converge_tick(&mut self, ledger: &mut CapacityLedger) -> ControllerResult<TickStats> {
        let services = &self.services;
        let found = candidates(
            services.topology.as_ref(),
            services.telemetry.as_ref(),
            &self.config.topology,
        )?;
        let selected: Vec<TargetId> = select(
            found,
            &self.config.selector,
            self.config.controller.max_targets,
        )
        .into_iter()
        .map(|c| c.state.name)
        .collect();

        let estimator = self.estimator;
        for name in &selected {
            self.controllers
                .entry(name.clone())
                .or_insert_with(|| ConvergenceController::new(name.clone(), estimator));
        }

        for (name, controller) in self.controllers.iter_mut() {
            controller.begin_tick();
            if !selected.contains(name) {
                controller.drain(services);
            }
        }

        // Steps 1-4 in ranking order; a failing target sits this tick out.
        let mut active: Vec<TargetId> = Vec::with_capacity(selected.len());
        for name in &selected {
            let Some(controller) = self.controllers.get_mut(name) else {
                continue;
            };
            match controller.assess(services, ledger) {
                Ok(_) => active.push(name.clone()),
                Err(e) => warn!(target = %name, error = %e, "tick aborted for target"),
            }
        }

        let mut stats = TickStats::default();
        match pass_budget(ledger, self.config.controller.budget_fraction) {
            None => {
                debug!("memory gate closed, skipping allocation");
                stats.gated = true;
            }
            Some(budget) => {
                let report = {
                    let mut pass = PlanningPass::new(ledger, budget);
                    for name in &active {
                        if let Some(controller) = self.controllers.get_mut(name)
                            && let Err(e) = controller.allocate(&mut pass)
                        {
                            warn!(target = %name, error = %e, "allocation failed");
                        }
                    }
                    pass.execute(
                        services.exec.as_ref(),
                        &self.config.programs,
                        services.clock.as_ref(),
                    )
                };
                for name in &active {
                    if let Some(controller) = self.controllers.get_mut(name) {
                        controller.absorb(&report);
                    }
                }
            }
        }

        // Harden demand was sized against grow already in flight, not the
        // grow launched above. Any harden it trims is re-planned next tick.
        for name in &active {
            if let Some(controller) = self.controllers.get_mut(name) {
                controller.evict_surplus(services, ledger);
            }
        }

        self.controllers
            .retain(|name, c| selected.contains(name) || !c.in_flight().is_empty());
        for controller in self.controllers.values() {
            stats.merge(controller.stats());
        }

        debug!(
            targets = active.len(),
            launched = stats.launched.total(),
            evicted = stats.evicted(),
            "converge tick done"
        );
        Ok(stats)
    }

    fn batch_tick(&mut self, ledger: &mut CapacityLedger) -> ControllerResult<TickStats> {
        let services = &self.services;
        let mut stats = TickStats::default();

        for set in self.batches.values_mut() {
            stats.reaped += set.reap(services.exec.as_ref()).len() as u32;
        }
        self.batches.retain(|_, set| !set.is_empty());

        let Some(budget) = pass_budget(ledger, self.config.controller.budget_fraction) else {
            debug!("memory gate closed, skipping batch");
            stats.gated = true;
            return Ok(stats);
        };

        let found = candidates(
            services.topology.as_ref(),
            services.telemetry.as_ref(),
            &self.config.topology,
        )?;
        let Some(best) = best_by_yield(found) else {
            debug!("no batch target available");
            return Ok(stats);
        };
        let target = best.state.name;
        let timing = BatchTiming::from_telemetry(services.telemetry.as_ref(), &target)?;
        let threads = &self.config.batch;

        let report = {
            let mut pass = PlanningPass::new(ledger, budget);
            if !plan_batch(&mut pass, &target, &timing, threads)? {
                stats.shortfall.add(JobKind::Extract, threads.extract_threads);
                stats.shortfall.add(JobKind::Grow, threads.grow_threads);
                stats.shortfall.add(JobKind::Harden, threads.harden_threads);
                return Ok(stats);
            }
            pass.execute(
                services.exec.as_ref(),
                &self.config.programs,
                services.clock.as_ref(),
            )
        };

        if !report.failed.is_empty() {
            // A partial batch would land out of order.
            warn!(
                target = %target,
                failed = report.failed.len(),
                "batch launch incomplete, cancelling"
            );
            for handle in &report.launched {
                terminate(services, ledger, handle);
            }
            for kind in JobKind::ALL {
                stats.failed.add(kind, report.failed_threads(kind));
                stats.shortfall.add(kind, report.failed_threads(kind));
            }
            return Ok(stats);
        }

        for kind in JobKind::ALL {
            stats.launched.add(kind, report.launched_threads(kind));
        }
        info!(
            target = %target,
            batch_ms = timing.batch.as_millis() as u64,
            jobs = report.launched.len(),
            "batch launched"
        );
        self.batches
            .entry(target.clone())
            .or_insert_with(|| InFlightSet::new(target))
            .extend(report.launched);
        Ok(stats)
    }

    fn publish(&mut self, ledger: &CapacityLedger, stats: TickStats) {
        self.tick += 1;

        let mut targets: Vec<ControllerSnapshot> =
            self.controllers.values().map(ConvergenceController::snapshot).collect();
        for set in self.batches.values() {
            targets.push(self.batch_snapshot(set));
        }

        self.snapshots.send_replace(FleetSnapshot {
            tick: self.tick,
            timestamp_ms: self.services.clock.now_ms(),
            mode: self.config.controller.mode,
            ledger: LedgerView {
                ledger: ledger.snapshot(),
                budget: allowed_memory(ledger, self.config.controller.budget_fraction),
            },
            targets,
            last_tick: stats,
        });
    }

    fn batch_snapshot(&self, set: &InFlightSet) -> ControllerSnapshot {
        let state = self.services.telemetry.target_state(set.target()).ok();
        ControllerSnapshot {
            target: set.target().to_string(),
            state: match &state {
                Some(s) if s.is_converged() => ConvergenceState::Converged,
                _ => ConvergenceState::Converging,
            },
            security: state.as_ref().map_or(0.0, |s| s.security),
            security_floor: state.as_ref().map_or(0.0, |s| s.security_floor),
            funds: state.as_ref().map_or(0.0, |s| s.funds),
            funds_max: state.as_ref().map_or(0.0, |s| s.funds_max),
            demand: Default::default(),
            in_flight: set.totals(),
            jobs: set.len(),
        }
    }

    /// Run ticks every `interval` until `shutdown` changes.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = interval.as_millis() as u64,
            mode = ?self.config.controller.mode,
            "supervisor started"
        );
        if let Err(e) = self.recover() {
            warn!(error = %e, "startup recovery failed");
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "supervisor tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("supervisor shutting down");
                    break;
                }
            }
        }

        let ledger = self.ledger.lock().await;
        debug!(
            outstanding = ledger.outstanding(),
            "ledger state at shutdown"
        );
    }
}
