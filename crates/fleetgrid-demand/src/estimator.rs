//! Thread demand: how many harden and grow threads a target needs.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fleet_core::{TargetState, TelemetryService};

use crate::error::{EstimationError, EstimationResult};

/// Slack for float error when comparing an effect against a delta.
const EPSILON: f64 = 1e-9;

/// Threads each kind needs this tick. `None` means the estimate failed
/// and the kind is skipped until the next tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demand {
    pub harden: Option<u32>,
    pub grow: Option<u32>,
}

/// Smallest `n >= 1` with `effect(n) >= delta`, or 0 when `delta <= 0`.
///
/// `effect` must be monotone non-decreasing.
pub fn min_threads_for(delta: f64, cap: u32, effect: impl Fn(u32) -> f64) -> EstimationResult<u32> {
    if !delta.is_finite() {
        return Err(EstimationError::NonFinite { what: "delta" });
    }
    if delta <= 0.0 {
        return Ok(0);
    }
    let covers = |n: u32| effect(n) + EPSILON >= delta;
    if cap == 0 || !covers(cap) {
        return Err(EstimationError::SearchExhausted { delta, cap });
    }

    // Probe 1, 2, 4, ... until the effect covers the delta.
    let mut lo = 0u32;
    let mut hi = 1u32;
    while !covers(hi) {
        lo = hi;
        hi = hi.saturating_mul(2).min(cap);
    }

    // Invariant: !covers(lo) (or lo == 0), covers(hi).
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if covers(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Ok(hi)
}

/// Stateless demand calculator.
#[derive(Debug, Clone, Copy)]
pub struct DemandEstimator {
    max_search: u32,
}

impl DemandEstimator {
    pub fn new(max_search: u32) -> Self {
        Self { max_search }
    }

    pub fn max_search(&self) -> u32 {
        self.max_search
    }

    pub fn needed_harden_threads(
        &self,
        telemetry: &dyn TelemetryService,
        surplus: f64,
    ) -> EstimationResult<u32> {
        min_threads_for(surplus, self.max_search, |n| telemetry.harden_effect(n))
    }

    pub fn needed_grow_threads(
        &self,
        telemetry: &dyn TelemetryService,
        target: &TargetState,
    ) -> EstimationResult<u32> {
        if target.is_funds_maxed() {
            return Ok(0);
        }
        let raw = telemetry.grow_threads_for(&target.name, target.funds_multiplier())?;
        if !raw.is_finite() || raw < 0.0 {
            return Err(EstimationError::NonFinite {
                what: "grow_threads_for",
            });
        }
        let threads = raw.ceil();
        if threads > f64::from(self.max_search) {
            return Err(EstimationError::SearchExhausted {
                delta: target.funds_multiplier(),
                cap: self.max_search,
            });
        }
        Ok(threads as u32)
    }

    /// Harden threads covering the current surplus plus the security that
    /// `grow_threads` will add once they land. Two independent searches.
    pub fn combined_harden_threads(
        &self,
        telemetry: &dyn TelemetryService,
        target: &TargetState,
        grow_threads: u32,
    ) -> EstimationResult<u32> {
        let base = self.needed_harden_threads(telemetry, target.security_surplus())?;
        let impact = if grow_threads == 0 {
            0.0
        } else {
            telemetry.grow_security_impact(grow_threads, &target.name)?
        };
        let offset = self.needed_harden_threads(telemetry, impact)?;
        Ok(base.saturating_add(offset))
    }

    /// Demand for both kinds.
    ///
    /// A failed search only blanks that kind. Boundary errors (unknown
    /// target and the like) propagate so the caller abandons the tick.
    pub fn estimate(
        &self,
        telemetry: &dyn TelemetryService,
        target: &TargetState,
        grow_in_flight: u32,
    ) -> EstimationResult<Demand> {
        let harden = soften(
            self.combined_harden_threads(telemetry, target, grow_in_flight),
            target,
            "harden",
        )?;
        let grow = soften(self.needed_grow_threads(telemetry, target), target, "grow")?;
        debug!(target = %target.name, ?harden, ?grow, "demand estimated");
        Ok(Demand { harden, grow })
    }
}

fn soften(
    result: EstimationResult<u32>,
    target: &TargetState,
    kind: &str,
) -> EstimationResult<Option<u32>> {
    match result {
        Ok(n) => Ok(Some(n)),
        Err(e) if e.is_search_failure() => {
            warn!(target = %target.name, kind, error = %e, "demand unknown this tick");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_sim::{SimFleet, SimTarget};

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
    fn half_point_per_thread_covers_five_with_ten() {
        let n = min_threads_for(5.0, 1_000_000, |n| 0.5 * f64::from(n)).unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn zero_or_negative_surplus_needs_nothing() {
        assert_eq!(min_threads_for(0.0, 10, |n| f64::from(n)).unwrap(), 0);
        assert_eq!(min_threads_for(-3.0, 10, |n| f64::from(n)).unwrap(), 0);
    }

    #[test]
    fn tiny_surplus_needs_one_thread() {
        assert_eq!(min_threads_for(0.0001, 10, |n| f64::from(n)).unwrap(), 1);
    }

    #[test]
    fn search_beyond_cap_fails_closed() {
        let err = min_threads_for(100.0, 50, |n| f64::from(n)).unwrap_err();
        assert_eq!(err, EstimationError::SearchExhausted { delta: 100.0, cap: 50 });
        assert!(err.is_search_failure());
    }

    #[test]
    fn search_hits_cap_exactly() {
        assert_eq!(min_threads_for(50.0, 50, |n| f64::from(n)).unwrap(), 50);
    }

    #[test]
    fn stronger_effect_never_needs_more_threads() {
        let mut previous = u32::MAX;
        for per_thread in [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5] {
            let n = min_threads_for(7.3, 1_000_000, |n| per_thread * f64::from(n)).unwrap();
            assert!(n <= previous, "{per_thread} needed {n} > {previous}");
            previous = n;
        }
    }

    #[test]
    fn matches_linear_search_on_sublinear_effect() {
        let effect = |n: u32| f64::from(n).sqrt();
        for delta in [0.5, 1.0, 3.3, 12.0, 40.0] {
            let linear = (1..).find(|n| effect(*n) + EPSILON >= delta).unwrap();
            assert_eq!(min_threads_for(delta, 1_000_000, effect).unwrap(), linear);
        }
    }

    #[test]
    fn grow_demand_uses_inverse_and_rounds_up() {
        let fleet = SimFleet::builder()
            .target(SimTarget::new("alpha").with_growth_rate(0.03))
            .build();
        let estimator = DemandEstimator::new(1_000_000);

        let state = target(5.0, 5.0, 500.0, 1_000.0);
        let n = estimator.needed_grow_threads(&fleet, &state).unwrap();
        // ln 2 / ln 1.03 = 23.45
        assert_eq!(n, 24);

        let maxed = target(5.0, 5.0, 1_000.0, 1_000.0);
        assert_eq!(estimator.needed_grow_threads(&fleet, &maxed).unwrap(), 0);
    }

    #[test]
    fn combined_harden_adds_grow_side_effect() {
        let fleet = SimFleet::builder().target(SimTarget::new("alpha")).build();
        let estimator = DemandEstimator::new(1_000_000);
        let state = target(6.0, 5.0, 500.0, 1_000.0);

        // 1.0 surplus at 0.05 per thread.
        assert_eq!(estimator.combined_harden_threads(&fleet, &state, 0).unwrap(), 20);
        // 25 grow threads add 0.1 security, two more harden threads.
        assert_eq!(estimator.combined_harden_threads(&fleet, &state, 25).unwrap(), 22);
    }

    #[test]
    fn estimate_blanks_failed_kind_only() {
        let fleet = SimFleet::builder().target(SimTarget::new("alpha")).build();
        let estimator = DemandEstimator::new(10);
        // Surplus of 5 needs 100 harden threads, beyond the cap of 10.
        let state = target(10.0, 5.0, 999.0, 1_000.0);

        let demand = estimator.estimate(&fleet, &state, 0).unwrap();
        assert_eq!(demand.harden, None);
        assert_eq!(demand.grow, Some(1));
    }

    #[test]
    fn unknown_target_propagates() {
        let fleet = SimFleet::builder().build();
        let estimator = DemandEstimator::new(1_000);
        let state = target(10.0, 5.0, 10.0, 1_000.0);

        let err = estimator.estimate(&fleet, &state, 3).unwrap_err();
        assert!(matches!(err, EstimationError::Service(_)));
    }
}
