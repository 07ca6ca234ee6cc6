//! Shared types used across FleetGrid crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of a compute node.
pub type NodeId = String;

/// Identifier of a remote target.
pub type TargetId = String;

/// Identifier of a worker program known to the execution service.
pub type ProgramId = String;

/// Process id handed out by the execution service.
pub type ProcessId = u64;

/// Memory amount in the execution service's units.
pub type Memory = u64;

/// Milliseconds on the collaborator clock.
pub type Millis = u64;

// ── Job kinds ──────────────────────────────────────────────────────

/// The three worker job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Lowers target security.
    Harden,
    /// Raises target funds toward the maximum.
    Grow,
    /// Harvests target funds.
    Extract,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Harden, JobKind::Grow, JobKind::Extract];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Harden => "harden",
            JobKind::Grow => "grow",
            JobKind::Extract => "extract",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

/// Capacity of a single compute node as reported by the execution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub total_memory: Memory,
    pub used_memory: Memory,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, total_memory: Memory, used_memory: Memory) -> Self {
        Self {
            id: id.into(),
            total_memory,
            used_memory,
        }
    }

    pub fn free_memory(&self) -> Memory {
        self.total_memory.saturating_sub(self.used_memory)
    }
}

// ── Jobs ───────────────────────────────────────────────────────────

/// Identity of a job: kind plus target arguments. Thread count is not
/// part of identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub kind: JobKind,
    pub target: TargetId,
    pub args: Vec<String>,
}

/// What to run, not yet bound to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub kind: JobKind,
    pub target: TargetId,
    /// Extra arguments after the target name (for example a start delay).
    pub args: Vec<String>,
    pub threads: u32,
    /// Duration the job was expected to take when it was planned.
    pub expected_duration: Option<Duration>,
}

impl JobTemplate {
    /// A single-thread template with no extra arguments.
    pub fn new(kind: JobKind, target: impl Into<TargetId>) -> Self {
        Self {
            kind,
            target: target.into(),
            args: Vec::new(),
            threads: 1,
            expected_duration: None,
        }
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration = Some(duration);
        self
    }

    /// Append a start delay argument, in milliseconds.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.args.push(delay.as_millis().to_string());
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            kind: self.kind,
            target: self.target.clone(),
            args: self.args.clone(),
        }
    }

    /// Kind and arguments match; thread count is ignored.
    pub fn is_equivalent(&self, other: &JobTemplate) -> bool {
        self.kind == other.kind && self.target == other.target && self.args == other.args
    }

    /// Arguments passed to the worker program: target first, then extras.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.target.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

/// A template bound to a node and launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub template: JobTemplate,
    pub node: NodeId,
    pub pid: ProcessId,
    /// `None` for handles adopted from already-running processes.
    pub started_at: Option<Millis>,
    pub threads: u32,
}

impl JobHandle {
    pub fn kind(&self) -> JobKind {
        self.template.kind
    }

    pub fn elapsed(&self, now: Millis) -> Option<Duration> {
        self.started_at
            .map(|start| Duration::from_millis(now.saturating_sub(start)))
    }

    /// Time left until the job is expected to land, if known.
    pub fn remaining(&self, now: Millis) -> Option<Duration> {
        let expected = self.template.expected_duration?;
        let elapsed = self.elapsed(now)?;
        Some(expected.saturating_sub(elapsed))
    }
}

// ── Targets ────────────────────────────────────────────────────────

/// Telemetry for a single target, read fresh every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub name: TargetId,
    pub security: f64,
    pub security_floor: f64,
    pub funds: f64,
    pub funds_max: f64,
    pub required_skill: u32,
}

impl TargetState {
    /// Security above the floor, never negative.
    pub fn security_surplus(&self) -> f64 {
        (self.security - self.security_floor).max(0.0)
    }

    pub fn is_at_floor(&self) -> bool {
        self.security <= self.security_floor
    }

    pub fn is_funds_maxed(&self) -> bool {
        self.funds >= self.funds_max
    }

    pub fn is_converged(&self) -> bool {
        self.is_at_floor() && self.is_funds_maxed()
    }

    /// Growth multiplier needed to reach the maximum.
    pub fn funds_multiplier(&self) -> f64 {
        self.funds_max / self.funds.max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(security: f64, floor: f64, funds: f64, max: f64) -> TargetState {
        TargetState {
            name: "alpha".to_string(),
            security,
            security_floor: floor,
            funds,
            funds_max: max,
            required_skill: 1,
        }
    }

    #[test]
    fn equivalence_ignores_threads() {
        let a = JobTemplate::new(JobKind::Harden, "alpha").with_threads(3);
        let b = JobTemplate::new(JobKind::Harden, "alpha").with_threads(9);
        assert!(a.is_equivalent(&b));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn equivalence_respects_args_and_kind() {
        let a = JobTemplate::new(JobKind::Grow, "alpha");
        let delayed = a.clone().with_delay(Duration::from_millis(10));
        let harden = JobTemplate::new(JobKind::Harden, "alpha");
        assert!(!a.is_equivalent(&delayed));
        assert!(!a.is_equivalent(&harden));
    }

    #[test]
    fn launch_args_put_target_first() {
        let t = JobTemplate::new(JobKind::Extract, "alpha").with_delay(Duration::from_millis(2001));
        assert_eq!(t.launch_args(), vec!["alpha".to_string(), "2001".to_string()]);
    }

    #[test]
    fn remaining_requires_start_and_expectation() {
        let template = JobTemplate::new(JobKind::Harden, "alpha")
            .with_expected_duration(Duration::from_millis(5000));
        let handle = JobHandle {
            template: template.clone(),
            node: "n1".to_string(),
            pid: 7,
            started_at: Some(1000),
            threads: 1,
        };
        assert_eq!(handle.remaining(3000), Some(Duration::from_millis(3000)));
        assert_eq!(handle.remaining(9000), Some(Duration::ZERO));

        let adopted = JobHandle {
            started_at: None,
            ..handle
        };
        assert_eq!(adopted.remaining(3000), None);
    }

    #[test]
    fn convergence_needs_floor_and_max_funds() {
        assert!(target(5.0, 5.0, 100.0, 100.0).is_converged());
        assert!(!target(5.1, 5.0, 100.0, 100.0).is_converged());
        assert!(!target(5.0, 5.0, 99.0, 100.0).is_converged());
    }

    #[test]
    fn funds_multiplier_guards_empty_funds() {
        assert_eq!(target(1.0, 1.0, 0.0, 500.0).funds_multiplier(), 500.0);
        assert_eq!(target(1.0, 1.0, 250.0, 500.0).funds_multiplier(), 2.0);
    }

    #[test]
    fn node_free_memory_saturates() {
        assert_eq!(Node::new("n1", 16, 20).free_memory(), 0);
        assert_eq!(Node::new("n1", 16, 4).free_memory(), 12);
    }
}
