//! Target selection.
//!
//! Candidates are reachable targets the operator may work on. Two
//! rankings sit on top: by yield (funds per second of extract time) for
//! batch mode, and by need (smallest unconverged first) for converge mode.

use std::cmp::Ordering;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use fleet_core::config::{SelectorConfig, SelectorStrategy, TopologyConfig};
use fleet_core::{
    JobKind, ServiceError, ServiceResult, TargetState, TelemetryService, TopologyService,
};

/// A target that passed the candidate filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub state: TargetState,
    pub extract_fraction: f64,
    pub extract_duration: Duration,
}

impl Candidate {
    /// Funds one extract thread yields per second.
    pub fn yield_rate(&self) -> f64 {
        let secs = self.extract_duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.state.funds * self.extract_fraction / secs
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Security within `min_surplus` of the floor and funds at max.
    pub fn is_settled(&self, min_surplus: f64) -> bool {
        self.state.security_surplus() <= min_surplus && self.state.is_funds_maxed()
    }
}

/// Reachable nodes other than the root that we may run on, carry funds,
/// and are within the operator's skill.
///
/// Nodes without target telemetry are skipped.
pub fn candidates(
    topology: &dyn TopologyService,
    telemetry: &dyn TelemetryService,
    config: &TopologyConfig,
) -> ServiceResult<Vec<Candidate>> {
    let skill = telemetry.operator_skill();
    let mut out = Vec::new();

    for node in topology.list_reachable_nodes(&config.root, &[config.root.clone()])? {
        if !topology.has_execution_rights(&node)? {
            continue;
        }
        let state = match telemetry.target_state(&node) {
            Ok(state) => state,
            Err(ServiceError::UnknownTarget(_)) => continue,
            Err(e) => return Err(e),
        };
        if state.funds_max <= 0.0 || state.required_skill > skill {
            continue;
        }
        out.push(Candidate {
            extract_fraction: telemetry.extract_fraction(&node)?,
            extract_duration: telemetry.operation_duration(JobKind::Extract, &node)?,
            state,
        });
    }

    debug!(count = out.len(), "candidate targets");
    Ok(out)
}

/// Descending yield, ties by name.
pub fn rank_by_yield(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.yield_rate()
            .partial_cmp(&a.yield_rate())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name().cmp(b.name()))
    });
    candidates
}

/// Unsettled candidates by ascending max funds, then surplus, then name.
pub fn rank_by_need(candidates: Vec<Candidate>, min_surplus: f64) -> Vec<Candidate> {
    let mut ranked: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| !c.is_settled(min_surplus))
        .collect();
    ranked.sort_by(|a, b| {
        a.state
            .funds_max
            .partial_cmp(&b.state.funds_max)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.state
                    .security_surplus()
                    .partial_cmp(&b.state.security_surplus())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.name().cmp(b.name()))
    });
    ranked
}

pub fn best_by_yield(candidates: Vec<Candidate>) -> Option<Candidate> {
    rank_by_yield(candidates).into_iter().next()
}

pub fn most_in_need(candidates: Vec<Candidate>, min_surplus: f64) -> Option<Candidate> {
    rank_by_need(candidates, min_surplus).into_iter().next()
}

/// Up to `limit` targets under the configured strategy.
pub fn select(candidates: Vec<Candidate>, config: &SelectorConfig, limit: usize) -> Vec<Candidate> {
    let ranked = match config.strategy {
        SelectorStrategy::Yield => rank_by_yield(candidates),
        SelectorStrategy::Need => rank_by_need(candidates, config.min_security_surplus),
    };
    ranked.into_iter().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_sim::{SimFleet, SimNode, SimTarget};

    fn candidate(name: &str, security: f64, funds: f64, max: f64, secs: u64) -> Candidate {
        Candidate {
            state: TargetState {
                name: name.to_string(),
                security,
                security_floor: 5.0,
                funds,
                funds_max: max,
                required_skill: 1,
            },
            extract_fraction: 0.01,
            extract_duration: Duration::from_secs(secs),
        }
    }

    fn names(list: &[Candidate]) -> Vec<&str> {
        list.iter().map(Candidate::name).collect()
    }

    #[test]
    fn candidate_filter_applies_rights_funds_and_skill() {
        let fleet = SimFleet::builder()
            .node(SimNode::new("home", 64).rooted())
            .node(SimNode::new("relay", 8).rooted())
            .target(SimTarget::new("open"))
            .target(SimTarget::new("broke").with_funds(0.0, 0.0))
            .target(SimTarget::new("elite").with_required_skill(99))
            .target(SimTarget::new("far"))
            .link("home", "relay")
            .link("relay", "open")
            .link("relay", "broke")
            .link("relay", "elite")
            .operator_skill(10)
            .build();

        let found = candidates(&fleet, &fleet, &TopologyConfig::default()).unwrap();

        // "relay" is a node but not a target; "far" is unreachable.
        assert_eq!(names(&found), vec!["open"]);
    }

    #[test]
    fn yield_ranking_prefers_funds_per_second() {
        let ranked = rank_by_yield(vec![
            candidate("slow", 10.0, 1_000.0, 1_000.0, 10),
            candidate("fast", 10.0, 1_000.0, 1_000.0, 2),
            candidate("rich", 10.0, 8_000.0, 8_000.0, 10),
        ]);
        assert_eq!(names(&ranked), vec!["rich", "fast", "slow"]);
    }

    #[test]
    fn need_ranking_skips_settled_and_orders_small_first() {
        let ranked = rank_by_need(
            vec![
                candidate("settled", 5.0, 500.0, 500.0, 1),
                candidate("big", 9.0, 10.0, 90_000.0, 1),
                candidate("small-hot", 12.0, 10.0, 1_000.0, 1),
                candidate("small-cool", 6.0, 10.0, 1_000.0, 1),
            ],
            0.0,
        );
        assert_eq!(names(&ranked), vec!["small-cool", "small-hot", "big"]);
    }

    #[test]
    fn floor_target_with_low_funds_still_needs_work() {
        let ranked = rank_by_need(vec![candidate("floor", 5.0, 1.0, 100.0, 1)], 0.0);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn select_limits_and_follows_strategy() {
        let list = vec![
            candidate("a", 9.0, 200.0, 2_000.0, 1),
            candidate("b", 9.0, 900.0, 9_000.0, 1),
            candidate("c", 9.0, 100.0, 1_000.0, 1),
        ];
        let need = SelectorConfig::default();
        assert_eq!(names(&select(list.clone(), &need, 2)), vec!["c", "a"]);

        let by_yield = SelectorConfig {
            strategy: SelectorStrategy::Yield,
            ..SelectorConfig::default()
        };
        assert_eq!(best_by_yield(list.clone()).unwrap().name(), "b");
        assert_eq!(names(&select(list, &by_yield, 1)), vec!["b"]);
    }
}
