//! Launch executor: turns merged launch requests into running jobs.

use tracing::{info, warn};

use fleet_core::config::ProgramsConfig;
use fleet_core::{Clock, ExecutionService, JobHandle, JobKind, ServiceError};
use fleetgrid_ledger::ReservationSet;

use crate::merge::LaunchRequest;

/// A request that the execution service refused.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedLaunch {
    pub request: LaunchRequest,
    pub error: ServiceError,
}

/// Outcome of executing one planning pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchReport {
    pub launched: Vec<JobHandle>,
    pub failed: Vec<FailedLaunch>,
}

impl LaunchReport {
    pub fn launched_threads(&self, kind: JobKind) -> u32 {
        self.launched
            .iter()
            .filter(|h| h.kind() == kind)
            .map(|h| h.threads)
            .sum()
    }

    /// Threads lost to launch failures, added to the pass shortfall.
    pub fn failed_threads(&self, kind: JobKind) -> u32 {
        self.failed
            .iter()
            .filter(|f| f.request.template.kind == kind)
            .map(|f| f.request.template.threads)
            .sum()
    }

    pub fn total_failed_threads(&self) -> u32 {
        JobKind::ALL.iter().map(|k| self.failed_threads(*k)).sum()
    }
}

/// Spawn every request.
///
/// A successful spawn commits the request's reservations and yields a
/// handle stamped with the clock's current time. A failed spawn releases
/// them; there is no retry within the pass.
pub fn execute(
    set: &mut ReservationSet<'_>,
    requests: Vec<LaunchRequest>,
    exec: &dyn ExecutionService,
    programs: &ProgramsConfig,
    clock: &dyn Clock,
) -> LaunchReport {
    let mut report = LaunchReport::default();

    for request in requests {
        let program = programs.program(request.template.kind);
        let args = request.template.launch_args();
        let threads = request.template.threads;

        match exec.spawn(&request.node, program, threads, &args) {
            Ok(pid) => {
                for id in &request.reservations {
                    set.commit(*id);
                }
                info!(
                    node = %request.node,
                    kind = %request.template.kind,
                    target = %request.template.target,
                    threads,
                    pid,
                    "launched job"
                );
                report.launched.push(JobHandle {
                    node: request.node,
                    pid,
                    started_at: Some(clock.now_ms()),
                    threads,
                    template: request.template,
                });
            }
            Err(error) => {
                for id in &request.reservations {
                    set.release(*id);
                }
                warn!(
                    node = %request.node,
                    kind = %request.template.kind,
                    target = %request.template.target,
                    threads,
                    error = %error,
                    "launch failed"
                );
                report.failed.push(FailedLaunch { request, error });
            }
        }
    }

    report
}
