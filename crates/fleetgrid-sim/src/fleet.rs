//! The simulated fleet and its builder.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use fleet_core::config::ProgramsConfig;
use fleet_core::{
    JobKind, Memory, Millis, NodeId, ProcessId, ProcessInfo, ProgramId, TargetId, TargetState,
};

use crate::model::{SimNode, SimTarget};

/// A job that ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub pid: ProcessId,
    pub kind: JobKind,
    pub target: TargetId,
    pub threads: u32,
    pub finished_at: Millis,
}

#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub kind: JobKind,
    pub cost: Memory,
}

#[derive(Debug, Clone)]
pub(crate) struct Process {
    pub info: ProcessInfo,
    pub kind: JobKind,
    pub target: TargetId,
    pub memory: Memory,
    pub finishes_at: Millis,
}

#[derive(Debug, Default)]
pub(crate) struct SimState {
    pub nodes: BTreeMap<NodeId, SimNode>,
    pub used: HashMap<NodeId, Memory>,
    pub links: BTreeMap<NodeId, BTreeSet<NodeId>>,
    pub targets: BTreeMap<TargetId, SimTarget>,
    pub programs: HashMap<ProgramId, Program>,
    pub processes: BTreeMap<ProcessId, Process>,
    /// Nodes whose spawns fail regardless of capacity.
    pub rejecting: BTreeSet<NodeId>,
    pub completions: Vec<Completion>,
    pub operator_skill: u32,
    pub next_pid: ProcessId,
    pub now: Millis,
}

impl SimState {
    pub fn used_memory(&self, node: &str) -> Memory {
        let baseline = self.nodes.get(node).map_or(0, |n| n.baseline_used);
        baseline + self.used.get(node).copied().unwrap_or(0)
    }

    pub fn remove_process(&mut self, pid: ProcessId) -> Option<Process> {
        let process = self.processes.remove(&pid)?;
        if let Some(used) = self.used.get_mut(&process.info.node) {
            *used = used.saturating_sub(process.memory);
        }
        Some(process)
    }
}

/// In-memory fleet implementing every collaborator trait.
#[derive(Debug)]
pub struct SimFleet {
    state: Mutex<SimState>,
}

impl SimFleet {
    pub fn builder() -> SimFleetBuilder {
        SimFleetBuilder::default()
    }

    /// A small mixed fleet with a handful of targets, used by `fleetd simulate`.
    pub fn demo() -> Self {
        Self::demo_builder().build()
    }

    /// The [`demo`](Self::demo) fleet, left open for further tweaks.
    pub fn demo_builder() -> SimFleetBuilder {
        Self::builder()
            .node(SimNode::new("home", 64).rooted())
            .node(SimNode::new("rack-1", 128).rooted())
            .node(SimNode::new("rack-2", 64).rooted())
            .node(SimNode::new("edge-1", 32).rooted())
            .node(SimNode::new("edge-2", 16))
            .link("home", "rack-1")
            .link("home", "rack-2")
            .link("rack-1", "edge-1")
            .link("rack-2", "edge-2")
            .target(SimTarget::new("alpha"))
            .target(
                SimTarget::new("beta")
                    .with_security(15.0, 5.0)
                    .with_funds(20_000.0, 250_000.0),
            )
            .target(
                SimTarget::new("gamma")
                    .with_security(25.0, 8.0)
                    .with_funds(5_000.0, 1_000_000.0)
                    .with_required_skill(50),
            )
            .link("rack-1", "alpha")
            .link("rack-2", "beta")
            .link("edge-1", "gamma")
            .operator_skill(10)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state lock")
    }

    /// Move the virtual clock forward and land every job that finished.
    pub fn advance(&self, by: Duration) -> Vec<Completion> {
        let mut state = self.lock();
        state.now += by.as_millis() as Millis;
        let now = state.now;

        let mut due: Vec<(Millis, ProcessId)> = state
            .processes
            .values()
            .filter(|p| p.finishes_at <= now)
            .map(|p| (p.finishes_at, p.info.pid))
            .collect();
        due.sort_unstable();

        let mut landed = Vec::with_capacity(due.len());
        for (finished_at, pid) in due {
            let Some(process) = state.remove_process(pid) else {
                continue;
            };
            if let Some(target) = state.targets.get_mut(&process.target) {
                target.apply(process.kind, process.info.threads);
            }
            debug!(
                pid,
                kind = %process.kind,
                target = %process.target,
                threads = process.info.threads,
                finished_at,
                "sim job landed"
            );
            landed.push(Completion {
                pid,
                kind: process.kind,
                target: process.target,
                threads: process.info.threads,
                finished_at,
            });
        }
        state.completions.extend(landed.iter().cloned());
        landed
    }

    pub fn now(&self) -> Millis {
        self.lock().now
    }

    /// Every completion since the fleet was built, in landing order.
    pub fn completions(&self) -> Vec<Completion> {
        self.lock().completions.clone()
    }

    pub fn target(&self, name: &str) -> Option<TargetState> {
        self.lock().targets.get(name).map(SimTarget::state)
    }

    /// Overwrite a target's security, as an outside actor would.
    pub fn set_security(&self, name: &str, security: f64) {
        if let Some(target) = self.lock().targets.get_mut(name) {
            target.security = security;
        }
    }

    pub fn set_funds(&self, name: &str, funds: f64) {
        if let Some(target) = self.lock().targets.get_mut(name) {
            target.funds = funds;
        }
    }

    /// Make every spawn on `node` fail with a launch failure, or stop doing so.
    pub fn reject_spawns(&self, node: &str, reject: bool) {
        let mut state = self.lock();
        if reject {
            state.rejecting.insert(node.to_string());
        } else {
            state.rejecting.remove(node);
        }
        debug!(node, reject, "spawn rejection toggled");
    }

    pub fn running(&self) -> usize {
        self.lock().processes.len()
    }

    /// Running threads of `kind` against `target`.
    pub fn running_threads(&self, kind: JobKind, target: &str) -> u32 {
        self.lock()
            .processes
            .values()
            .filter(|p| p.kind == kind && p.target == target)
            .map(|p| p.info.threads)
            .sum()
    }

    pub fn finish_time(&self, pid: ProcessId) -> Option<Millis> {
        self.lock().processes.get(&pid).map(|p| p.finishes_at)
    }
}

/// Builder for [`SimFleet`].
#[derive(Debug)]
pub struct SimFleetBuilder {
    nodes: Vec<SimNode>,
    links: Vec<(NodeId, NodeId)>,
    targets: Vec<SimTarget>,
    programs: ProgramsConfig,
    costs: HashMap<JobKind, Memory>,
    operator_skill: u32,
}

impl Default for SimFleetBuilder {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            targets: Vec::new(),
            programs: ProgramsConfig::default(),
            costs: HashMap::from([
                (JobKind::Harden, 2),
                (JobKind::Grow, 2),
                (JobKind::Extract, 2),
            ]),
            operator_skill: 1,
        }
    }
}

impl SimFleetBuilder {
    pub fn node(mut self, node: SimNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Undirected edge between two nodes.
    pub fn link(mut self, a: impl Into<NodeId>, b: impl Into<NodeId>) -> Self {
        self.links.push((a.into(), b.into()));
        self
    }

    /// Register a target. A target with no node of the same name gets a
    /// zero-memory node with execution rights.
    pub fn target(mut self, target: SimTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn programs(mut self, programs: ProgramsConfig) -> Self {
        self.programs = programs;
        self
    }

    pub fn thread_cost(mut self, kind: JobKind, cost: Memory) -> Self {
        self.costs.insert(kind, cost);
        self
    }

    pub fn operator_skill(mut self, skill: u32) -> Self {
        self.operator_skill = skill;
        self
    }

    pub fn build(self) -> SimFleet {
        let mut state = SimState {
            operator_skill: self.operator_skill,
            next_pid: 1,
            ..SimState::default()
        };

        for node in self.nodes {
            state.nodes.insert(node.id.clone(), node);
        }
        for target in self.targets {
            state
                .nodes
                .entry(target.name.clone())
                .or_insert_with(|| SimNode::new(target.name.clone(), 0).rooted());
            state.targets.insert(target.name.clone(), target);
        }
        for (a, b) in self.links {
            state.links.entry(a.clone()).or_default().insert(b.clone());
            state.links.entry(b).or_default().insert(a);
        }
        for kind in JobKind::ALL {
            let cost = self.costs.get(&kind).copied().unwrap_or(1);
            state
                .programs
                .insert(self.programs.program(kind).to_string(), Program { kind, cost });
        }

        SimFleet {
            state: Mutex::new(state),
        }
    }
}
