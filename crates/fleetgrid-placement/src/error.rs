//! Placement error types.

use thiserror::Error;

use fleet_core::JobKind;

/// Errors that stop a template from being planned at all.
///
/// Running out of capacity or budget is not an error; it shows up as
/// shortfall in the plan outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("no per-thread memory cost known for {0} jobs")]
    UnknownCost(JobKind),

    #[error("per-thread memory cost for {0} jobs is zero")]
    ZeroCost(JobKind),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
