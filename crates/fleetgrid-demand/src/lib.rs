//! fleetgrid-demand — how many threads a target needs, and which targets to work.
//!
//! The estimator is pure: it reads a `TargetState` plus the effect
//! functions exposed by the telemetry collaborator and returns whole
//! thread counts.
//!
//! ```text
//! harden  = min n >= 1 with harden_effect(n) >= surplus        (0 if surplus <= 0)
//!         + min n >= 1 with harden_effect(n) >= grow_security_impact(in_flight_grow)
//! grow    = ceil(grow_threads_for(funds_max / max(funds, 1)))  (0 if funds maxed)
//! ```
//!
//! The harden search probes exponentially, then bisects, and gives up at
//! `max_search_threads`.

pub mod error;
pub mod estimator;
pub mod selector;

pub use error::{EstimationError, EstimationResult};
pub use estimator::{Demand, DemandEstimator, min_threads_for};
pub use selector::{
    Candidate, best_by_yield, candidates, most_in_need, rank_by_need, rank_by_yield, select,
};
