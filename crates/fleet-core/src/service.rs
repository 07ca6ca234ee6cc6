//! Collaborator interfaces.
//!
//! Everything outside the allocation engine sits behind one of these
//! traits: launching and killing processes, walking the node graph, and
//! reading target telemetry. The engine never talks to a node or target
//! except through them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::types::{JobKind, Memory, Millis, Node, NodeId, ProcessId, ProgramId, TargetState};

/// Source of the current time in milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Wall clock (Unix epoch milliseconds).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Millis
    }
}

/// A process already running on a node, as listed by the execution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub node: NodeId,
    pub program: ProgramId,
    pub threads: u32,
    pub args: Vec<String>,
}

/// Launches and tracks worker processes on nodes.
pub trait ExecutionService: Send + Sync {
    /// Copy and launch `program` on `node` with `threads` parallel instances.
    fn spawn(
        &self,
        node: &str,
        program: &str,
        threads: u32,
        args: &[String],
    ) -> ServiceResult<ProcessId>;

    fn is_alive(&self, pid: ProcessId) -> bool;

    /// Terminate a process. Returns `false` if it was not running.
    fn kill(&self, pid: ProcessId) -> bool;

    fn memory_cost_per_thread(&self, program: &str) -> ServiceResult<Memory>;

    /// Current capacity and usage of a node.
    fn node(&self, node: &str) -> ServiceResult<Node>;

    fn list_processes(&self, node: &str) -> ServiceResult<Vec<ProcessInfo>>;
}

/// Network topology: which nodes exist and which we may run on.
pub trait TopologyService: Send + Sync {
    fn list_reachable_nodes(&self, root: &str, excluded: &[NodeId]) -> ServiceResult<Vec<NodeId>>;

    fn has_execution_rights(&self, node: &str) -> ServiceResult<bool>;
}

/// Target telemetry and the effect functions of the worker programs.
pub trait TelemetryService: Send + Sync {
    /// `(current, floor)`.
    fn security(&self, target: &str) -> ServiceResult<(f64, f64)>;

    /// `(current, max)`.
    fn funds(&self, target: &str) -> ServiceResult<(f64, f64)>;

    fn required_skill(&self, target: &str) -> ServiceResult<u32>;

    /// Skill level of the operator running the fleet.
    fn operator_skill(&self) -> u32;

    fn operation_duration(&self, kind: JobKind, target: &str) -> ServiceResult<Duration>;

    /// Security removed by `threads` harden threads.
    fn harden_effect(&self, threads: u32) -> f64;

    /// Funds multiplier produced by `threads` grow threads.
    fn grow_effect(&self, threads: u32, target: &str) -> ServiceResult<f64>;

    /// Security added by `threads` grow threads.
    fn grow_security_impact(&self, threads: u32, target: &str) -> ServiceResult<f64>;

    /// Inverse of `grow_effect`: threads needed to reach `multiplier`.
    fn grow_threads_for(&self, target: &str, multiplier: f64) -> ServiceResult<f64>;

    /// Fraction of current funds removed by one extract thread.
    fn extract_fraction(&self, target: &str) -> ServiceResult<f64>;

    fn target_state(&self, target: &str) -> ServiceResult<TargetState> {
        let (security, security_floor) = self.security(target)?;
        let (funds, funds_max) = self.funds(target)?;
        Ok(TargetState {
            name: target.to_string(),
            security,
            security_floor,
            funds,
            funds_max,
            required_skill: self.required_skill(target)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2024() {
        assert!(SystemClock.now_ms() > 1_704_067_200_000);
    }
}
