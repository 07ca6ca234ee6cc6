//! Simulated nodes and targets, and the effect formulas the workers apply.

use std::time::Duration;

use fleet_core::{JobKind, Memory, NodeId, TargetId, TargetState};

/// Security removed per harden thread.
pub const HARDEN_PER_THREAD: f64 = 0.05;
/// Security added per grow thread.
pub const GROW_SECURITY_PER_THREAD: f64 = 0.004;
/// Security added per extract thread.
pub const EXTRACT_SECURITY_PER_THREAD: f64 = 0.002;
/// Security never rises above this.
pub const MAX_SECURITY: f64 = 100.0;

/// A compute node in the simulated graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SimNode {
    pub id: NodeId,
    pub total: Memory,
    /// Memory held by something other than simulated jobs.
    pub baseline_used: Memory,
    pub rooted: bool,
}

impl SimNode {
    pub fn new(id: impl Into<NodeId>, total: Memory) -> Self {
        Self {
            id: id.into(),
            total,
            baseline_used: 0,
            rooted: false,
        }
    }

    /// Grant execution rights.
    pub fn rooted(mut self) -> Self {
        self.rooted = true;
        self
    }

    pub fn with_used(mut self, used: Memory) -> Self {
        self.baseline_used = used;
        self
    }
}

/// A remote target with evolving security and funds.
#[derive(Debug, Clone, PartialEq)]
pub struct SimTarget {
    pub name: TargetId,
    pub security: f64,
    pub security_floor: f64,
    pub funds: f64,
    pub funds_max: f64,
    pub required_skill: u32,
    /// Per-thread growth rate.
    pub growth_rate: f64,
    /// Fraction of funds one extract thread removes.
    pub extract_fraction: f64,
    /// Extract duration at zero security.
    pub base_duration: Duration,
}

impl SimTarget {
    /// Security 10 over floor 5, funds 1000 of 10000.
    pub fn new(name: impl Into<TargetId>) -> Self {
        Self {
            name: name.into(),
            security: 10.0,
            security_floor: 5.0,
            funds: 1_000.0,
            funds_max: 10_000.0,
            required_skill: 1,
            growth_rate: 0.03,
            extract_fraction: 0.002,
            base_duration: Duration::from_millis(1_000),
        }
    }

    pub fn with_security(mut self, security: f64, floor: f64) -> Self {
        self.security = security;
        self.security_floor = floor;
        self
    }

    pub fn with_funds(mut self, funds: f64, max: f64) -> Self {
        self.funds = funds;
        self.funds_max = max;
        self
    }

    pub fn with_required_skill(mut self, skill: u32) -> Self {
        self.required_skill = skill;
        self
    }

    pub fn with_growth_rate(mut self, rate: f64) -> Self {
        self.growth_rate = rate;
        self
    }

    pub fn with_extract_fraction(mut self, fraction: f64) -> Self {
        self.extract_fraction = fraction;
        self
    }

    pub fn with_base_duration(mut self, base: Duration) -> Self {
        self.base_duration = base;
        self
    }

    pub fn state(&self) -> TargetState {
        TargetState {
            name: self.name.clone(),
            security: self.security,
            security_floor: self.security_floor,
            funds: self.funds,
            funds_max: self.funds_max,
            required_skill: self.required_skill,
        }
    }

    /// Extract runs at the base duration scaled by security; grow takes
    /// 3.2x and harden 4x as long.
    pub fn duration(&self, kind: JobKind) -> Duration {
        let extract_ms = self.base_duration.as_millis() as f64 * (1.0 + self.security / 20.0);
        let ms = match kind {
            JobKind::Extract => extract_ms,
            JobKind::Grow => extract_ms * 3.2,
            JobKind::Harden => extract_ms * 4.0,
        };
        Duration::from_millis(ms.round() as u64)
    }

    pub fn grow_multiplier(&self, threads: u32) -> f64 {
        (1.0 + self.growth_rate).powf(f64::from(threads))
    }

    /// Fractional threads needed to multiply funds by `multiplier`.
    pub fn grow_threads_for(&self, multiplier: f64) -> f64 {
        if multiplier <= 1.0 || self.growth_rate <= 0.0 {
            return 0.0;
        }
        multiplier.ln() / (1.0 + self.growth_rate).ln()
    }

    pub fn apply(&mut self, kind: JobKind, threads: u32) {
        let n = f64::from(threads);
        match kind {
            JobKind::Harden => {
                self.security = (self.security - HARDEN_PER_THREAD * n).max(self.security_floor);
            }
            JobKind::Grow => {
                let grown = self.funds.max(1.0) * self.grow_multiplier(threads);
                self.funds = grown.min(self.funds_max);
                self.raise_security(GROW_SECURITY_PER_THREAD * n);
            }
            JobKind::Extract => {
                let taken = (self.extract_fraction * n).min(1.0);
                self.funds -= self.funds * taken;
                self.raise_security(EXTRACT_SECURITY_PER_THREAD * n);
            }
        }
    }

    fn raise_security(&mut self, delta: f64) {
        self.security = (self.security + delta).min(MAX_SECURITY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harden_stops_at_floor() {
        let mut t = SimTarget::new("alpha").with_security(5.2, 5.0);
        t.apply(JobKind::Harden, 2);
        assert!((t.security - 5.1).abs() < 1e-9);
        t.apply(JobKind::Harden, 100);
        assert_eq!(t.security, 5.0);
    }

    #[test]
    fn grow_caps_at_max_and_raises_security() {
        let mut t = SimTarget::new("alpha").with_security(5.0, 5.0).with_funds(0.0, 50.0);
        t.apply(JobKind::Grow, 1_000);
        assert_eq!(t.funds, 50.0);
        assert!((t.security - 9.0).abs() < 1e-9);
    }

    #[test]
    fn grow_threads_for_inverts_multiplier() {
        let t = SimTarget::new("alpha");
        let threads = t.grow_threads_for(2.0);
        let back = t.grow_multiplier(threads.ceil() as u32);
        assert!(back >= 2.0);
        assert_eq!(t.grow_threads_for(1.0), 0.0);
    }

    #[test]
    fn extract_takes_fraction_per_thread() {
        let mut t = SimTarget::new("alpha").with_funds(1_000.0, 1_000.0);
        t.apply(JobKind::Extract, 100);
        assert!((t.funds - 800.0).abs() < 1e-9);
    }

    #[test]
    fn durations_scale_with_security() {
        let low = SimTarget::new("alpha").with_security(0.0, 0.0);
        let high = SimTarget::new("alpha").with_security(20.0, 0.0);
        assert_eq!(low.duration(JobKind::Extract), Duration::from_millis(1_000));
        assert_eq!(high.duration(JobKind::Extract), Duration::from_millis(2_000));
        assert_eq!(low.duration(JobKind::Harden), Duration::from_millis(4_000));
        assert_eq!(low.duration(JobKind::Grow), Duration::from_millis(3_200));
    }
}
