//! Batch timing protocol.
//!
//! A batch fires all three kinds at one target at once, each sleeping
//! for its own delay so they land in a fixed order:
//!
//! ```text
//! batch          = max(grow, extract, harden)
//! grow_delay     = batch - grow
//! extract_delay  = batch - extract + 1ms
//! harden_delay   = batch - harden  + 2ms
//!
//! grow lands at batch, extract at batch + 1ms, harden at batch + 2ms
//! ```

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use fleet_core::config::BatchConfig;
use fleet_core::{JobKind, JobTemplate, ServiceResult, TelemetryService};
use fleetgrid_ledger::ReservationId;
use fleetgrid_placement::PlanningPass;

use crate::error::ControllerResult;

/// Gap between consecutive landings.
pub const LANDING_OFFSET: Duration = Duration::from_millis(1);

/// Start delays and durations for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchTiming {
    pub batch: Duration,
    pub grow: Duration,
    pub extract: Duration,
    pub harden: Duration,
    pub grow_delay: Duration,
    pub extract_delay: Duration,
    pub harden_delay: Duration,
}

impl BatchTiming {
    pub fn compute(grow: Duration, extract: Duration, harden: Duration) -> Self {
        let batch = grow.max(extract).max(harden);
        Self {
            batch,
            grow,
            extract,
            harden,
            grow_delay: batch - grow,
            extract_delay: batch - extract + LANDING_OFFSET,
            harden_delay: batch - harden + LANDING_OFFSET * 2,
        }
    }

    pub fn from_telemetry(telemetry: &dyn TelemetryService, target: &str) -> ServiceResult<Self> {
        Ok(Self::compute(
            telemetry.operation_duration(JobKind::Grow, target)?,
            telemetry.operation_duration(JobKind::Extract, target)?,
            telemetry.operation_duration(JobKind::Harden, target)?,
        ))
    }

    pub fn duration(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Grow => self.grow,
            JobKind::Extract => self.extract,
            JobKind::Harden => self.harden,
        }
    }

    pub fn delay(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Grow => self.grow_delay,
            JobKind::Extract => self.extract_delay,
            JobKind::Harden => self.harden_delay,
        }
    }

    /// Offset from submission at which `kind` lands.
    pub fn completion(&self, kind: JobKind) -> Duration {
        self.delay(kind) + self.duration(kind)
    }

    /// Kinds in landing order: grow, extract, harden.
    pub fn landing_order(&self) -> [JobKind; 3] {
        let mut kinds = [JobKind::Grow, JobKind::Extract, JobKind::Harden];
        kinds.sort_by_key(|k| self.completion(*k));
        kinds
    }

    /// Templates for a batch with the given thread counts.
    ///
    /// The expected duration includes the start delay, since the job's
    /// process is alive for both.
    pub fn templates(&self, target: &str, threads: &BatchConfig) -> Vec<JobTemplate> {
        [
            (JobKind::Extract, threads.extract_threads),
            (JobKind::Grow, threads.grow_threads),
            (JobKind::Harden, threads.harden_threads),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(kind, n)| {
            JobTemplate::new(kind, target)
                .with_threads(n)
                .with_delay(self.delay(kind))
                .with_expected_duration(self.completion(kind))
        })
        .collect()
    }
}

/// Reserve a whole batch in `pass`, or nothing.
///
/// Returns `false` and rolls back this batch's placements when any kind
/// falls short.
pub fn plan_batch(
    pass: &mut PlanningPass<'_>,
    target: &str,
    timing: &BatchTiming,
    threads: &BatchConfig,
) -> ControllerResult<bool> {
    let mut placed: Vec<ReservationId> = Vec::new();
    let mut complete = true;

    for template in timing.templates(target, threads) {
        let requested = template.threads;
        let outcome = pass.plan(&template, requested)?;
        placed.extend(outcome.placements.iter().map(|p| p.reservation));
        if outcome.shortfall > 0 {
            debug!(
                target,
                kind = %template.kind,
                shortfall = outcome.shortfall,
                "batch does not fit"
            );
            complete = false;
            break;
        }
    }

    if !complete {
        pass.rollback_where(|p| placed.contains(&p.reservation));
        return Ok(false);
    }

    info!(
        target,
        batch_ms = timing.batch.as_millis() as u64,
        "batch planned"
    );
    Ok(true)
}
