//! Jobs in flight against one target, by kind, in launch order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fleet_core::config::ProgramsConfig;
use fleet_core::{ExecutionService, JobHandle, JobKind, JobTemplate, ProcessInfo, TargetId};

/// Thread (or job) counts per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub harden: u32,
    pub grow: u32,
    pub extract: u32,
}

impl KindCounts {
    pub fn get(&self, kind: JobKind) -> u32 {
        match kind {
            JobKind::Harden => self.harden,
            JobKind::Grow => self.grow,
            JobKind::Extract => self.extract,
        }
    }

    pub fn add(&mut self, kind: JobKind, n: u32) {
        match kind {
            JobKind::Harden => self.harden += n,
            JobKind::Grow => self.grow += n,
            JobKind::Extract => self.extract += n,
        }
    }

    pub fn total(&self) -> u32 {
        self.harden + self.grow + self.extract
    }

    pub fn merge(&mut self, other: &KindCounts) {
        for kind in JobKind::ALL {
            self.add(kind, other.get(kind));
        }
    }
}

#[derive(Debug, Clone)]
pub struct InFlightSet {
    target: TargetId,
    jobs: BTreeMap<JobKind, Vec<JobHandle>>,
}

impl InFlightSet {
    pub fn new(target: impl Into<TargetId>) -> Self {
        Self {
            target: target.into(),
            jobs: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn push(&mut self, handle: JobHandle) {
        debug_assert_eq!(handle.template.target, self.target);
        self.jobs.entry(handle.kind()).or_default().push(handle);
    }

    pub fn extend(&mut self, handles: impl IntoIterator<Item = JobHandle>) {
        for handle in handles {
            self.push(handle);
        }
    }

    pub fn handles(&self, kind: JobKind) -> &[JobHandle] {
        self.jobs.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobHandle> {
        self.jobs.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.jobs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn threads(&self, kind: JobKind) -> u32 {
        self.handles(kind).iter().map(|h| h.threads).sum()
    }

    pub fn totals(&self) -> KindCounts {
        let mut counts = KindCounts::default();
        for kind in JobKind::ALL {
            counts.add(kind, self.threads(kind));
        }
        counts
    }

    /// Drop handles whose process has exited. Returns them.
    pub fn reap(&mut self, exec: &dyn ExecutionService) -> Vec<JobHandle> {
        self.take_where(|h| !exec.is_alive(h.pid))
    }

    /// Remove every handle matching `pred`, keeping the order of the rest.
    pub fn take_where(&mut self, mut pred: impl FnMut(&JobHandle) -> bool) -> Vec<JobHandle> {
        let mut taken = Vec::new();
        for handles in self.jobs.values_mut() {
            let mut kept = Vec::with_capacity(handles.len());
            for handle in handles.drain(..) {
                if pred(&handle) {
                    taken.push(handle);
                } else {
                    kept.push(handle);
                }
            }
            *handles = kept;
        }
        taken
    }

    /// Pop the newest jobs of `kind` until its thread count is at most
    /// `demand`. Whole jobs only, so the result may undershoot.
    pub fn take_surplus(&mut self, kind: JobKind, demand: u32) -> Vec<JobHandle> {
        let mut taken = Vec::new();
        let Some(handles) = self.jobs.get_mut(&kind) else {
            return taken;
        };
        let mut threads: u32 = handles.iter().map(|h| h.threads).sum();
        while threads > demand {
            let Some(newest) = handles.pop() else {
                break;
            };
            threads -= newest.threads;
            taken.push(newest);
        }
        taken
    }
}

/// Rebuild in-flight sets from processes that are already running.
///
/// The program id maps back to a kind and the first argument to the
/// target. Unrecognised processes are ignored. Adopted handles carry no
/// start time or expected duration.
pub fn adopt(
    processes: impl IntoIterator<Item = ProcessInfo>,
    programs: &ProgramsConfig,
) -> BTreeMap<TargetId, InFlightSet> {
    let mut sets: BTreeMap<TargetId, InFlightSet> = BTreeMap::new();

    for process in processes {
        let Some(kind) = programs.kind_of(&process.program) else {
            debug!(pid = process.pid, program = %process.program, "ignoring foreign process");
            continue;
        };
        let mut args = process.args.into_iter();
        let Some(target) = args.next() else {
            debug!(pid = process.pid, "ignoring process without target argument");
            continue;
        };

        let mut template = JobTemplate::new(kind, target.clone()).with_threads(process.threads);
        template.args = args.collect();

        info!(
            pid = process.pid,
            node = %process.node,
            kind = %kind,
            target = %target,
            threads = process.threads,
            "adopted running job"
        );
        sets.entry(target.clone())
            .or_insert_with(|| InFlightSet::new(target))
            .push(JobHandle {
                template,
                node: process.node,
                pid: process.pid,
                started_at: None,
                threads: process.threads,
            });
    }

    sets
}
