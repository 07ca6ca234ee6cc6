//! Errors raised while estimating demand.

use thiserror::Error;

use fleet_core::ServiceError;

pub type EstimationResult<T> = Result<T, EstimationError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    #[error("no thread count up to {cap} covers a delta of {delta}")]
    SearchExhausted { delta: f64, cap: u32 },

    #[error("effect function returned a non-finite value for {what}")]
    NonFinite { what: &'static str },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl EstimationError {
    /// Failures that leave one kind's demand unknown for this tick without
    /// aborting it.
    pub fn is_search_failure(&self) -> bool {
        matches!(
            self,
            EstimationError::SearchExhausted { .. } | EstimationError::NonFinite { .. }
        )
    }
}
