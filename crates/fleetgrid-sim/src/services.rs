use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use fleet_core::{
    Clock, ExecutionService, JobKind, Memory, Millis, Node, NodeId, ProcessId, ProcessInfo,
    ServiceError, ServiceResult, TelemetryService, TopologyService,
};

use crate::fleet::{Process, SimFleet};
use crate::model::{GROW_SECURITY_PER_THREAD, HARDEN_PER_THREAD, SimTarget};

impl ExecutionService for SimFleet {
    fn spawn(
        &self,
        node: &str,
        program: &str,
        threads: u32,
        args: &[String],
    ) -> ServiceResult<ProcessId> {
        let mut state = self.lock();
        let launch_failure = |reason: &str| ServiceError::LaunchFailure {
            node: node.to_string(),
            program: program.to_string(),
            threads,
            reason: reason.to_string(),
        };

        let sim_node = state
            .nodes
            .get(node)
            .ok_or_else(|| ServiceError::UnknownNode(node.to_string()))?;
        if !sim_node.rooted {
            return Err(launch_failure("no execution rights"));
        }
        if state.rejecting.contains(node) {
            return Err(launch_failure("spawn rejected"));
        }
        let total = sim_node.total;
        let spec = state
            .programs
            .get(program)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownProgram(program.to_string()))?;
        if threads == 0 {
            return Err(launch_failure("zero threads"));
        }

        let target_name = args
            .first()
            .ok_or_else(|| launch_failure("missing target argument"))?;
        let target = state
            .targets
            .get(target_name)
            .ok_or_else(|| ServiceError::UnknownTarget(target_name.clone()))?;
        let delay: Millis = match args.get(1) {
            Some(raw) => raw
                .parse()
                .map_err(|_| launch_failure("delay argument is not a number"))?,
            None => 0,
        };
        let duration = target.duration(spec.kind).as_millis() as Millis;

        let memory = spec.cost * Memory::from(threads);
        if state.used_memory(node) + memory > total {
            return Err(launch_failure("insufficient memory"));
        }

        let pid = state.next_pid;
        state.next_pid += 1;
        let finishes_at = state.now + delay + duration;
        *state.used.entry(node.to_string()).or_insert(0) += memory;
        state.processes.insert(
            pid,
            Process {
                info: ProcessInfo {
                    pid,
                    node: node.to_string(),
                    program: program.to_string(),
                    threads,
                    args: args.to_vec(),
                },
                kind: spec.kind,
                target: target_name.clone(),
                memory,
                finishes_at,
            },
        );
        Ok(pid)
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        self.lock().processes.contains_key(&pid)
    }

    fn kill(&self, pid: ProcessId) -> bool {
        self.lock().remove_process(pid).is_some()
    }

    fn memory_cost_per_thread(&self, program: &str) -> ServiceResult<Memory> {
        self.lock()
            .programs
            .get(program)
            .map(|p| p.cost)
            .ok_or_else(|| ServiceError::UnknownProgram(program.to_string()))
    }

    fn node(&self, node: &str) -> ServiceResult<Node> {
        let state = self.lock();
        let sim_node = state
            .nodes
            .get(node)
            .ok_or_else(|| ServiceError::UnknownNode(node.to_string()))?;
        Ok(Node::new(node, sim_node.total, state.used_memory(node)))
    }

    fn list_processes(&self, node: &str) -> ServiceResult<Vec<ProcessInfo>> {
        let state = self.lock();
        if !state.nodes.contains_key(node) {
            return Err(ServiceError::UnknownNode(node.to_string()));
        }
        Ok(state
            .processes
            .values()
            .filter(|p| p.info.node == node)
            .map(|p| p.info.clone())
            .collect())
    }
}

impl TopologyService for SimFleet {
    /// Breadth-first walk from `root`; the root itself is included unless excluded.
    fn list_reachable_nodes(&self, root: &str, excluded: &[NodeId]) -> ServiceResult<Vec<NodeId>> {
        let state = self.lock();
        if !state.nodes.contains_key(root) {
            return Err(ServiceError::UnknownNode(root.to_string()));
        }

        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root.to_string()]);
        seen.insert(root.to_string());

        while let Some(id) = queue.pop_front() {
            if let Some(neighbours) = state.links.get(&id) {
                for next in neighbours {
                    if seen.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
            if !excluded.contains(&id) {
                order.push(id);
            }
        }
        Ok(order)
    }

    fn has_execution_rights(&self, node: &str) -> ServiceResult<bool> {
        self.lock()
            .nodes
            .get(node)
            .map(|n| n.rooted)
            .ok_or_else(|| ServiceError::UnknownNode(node.to_string()))
    }
}

impl SimFleet {
    fn with_target<T>(&self, name: &str, f: impl FnOnce(&SimTarget) -> T) -> ServiceResult<T> {
        self.lock()
            .targets
            .get(name)
            .map(f)
            .ok_or_else(|| ServiceError::UnknownTarget(name.to_string()))
    }
}

impl TelemetryService for SimFleet {
    fn security(&self, target: &str) -> ServiceResult<(f64, f64)> {
        self.with_target(target, |t| (t.security, t.security_floor))
    }

    fn funds(&self, target: &str) -> ServiceResult<(f64, f64)> {
        self.with_target(target, |t| (t.funds, t.funds_max))
    }

    fn required_skill(&self, target: &str) -> ServiceResult<u32> {
        self.with_target(target, |t| t.required_skill)
    }

    fn operator_skill(&self) -> u32 {
        self.lock().operator_skill
    }

    fn operation_duration(&self, kind: JobKind, target: &str) -> ServiceResult<Duration> {
        self.with_target(target, |t| t.duration(kind))
    }

    fn harden_effect(&self, threads: u32) -> f64 {
        HARDEN_PER_THREAD * f64::from(threads)
    }

    fn grow_effect(&self, threads: u32, target: &str) -> ServiceResult<f64> {
        self.with_target(target, |t| t.grow_multiplier(threads))
    }

    fn grow_security_impact(&self, threads: u32, target: &str) -> ServiceResult<f64> {
        self.with_target(target, |_| GROW_SECURITY_PER_THREAD * f64::from(threads))
    }

    fn grow_threads_for(&self, target: &str, multiplier: f64) -> ServiceResult<f64> {
        self.with_target(target, |t| t.grow_threads_for(multiplier))
    }

    fn extract_fraction(&self, target: &str) -> ServiceResult<f64> {
        self.with_target(target, |t| t.extract_fraction)
    }
}

impl Clock for SimFleet {
    fn now_ms(&self) -> Millis {
        self.now()
    }
}
