//! Boundary errors raised by the collaborator services.

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced across the execution, topology, and telemetry boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("unknown program: {0}")]
    UnknownProgram(String),

    #[error("failed to launch {program} x{threads} on {node}: {reason}")]
    LaunchFailure {
        node: String,
        program: String,
        threads: u32,
        reason: String,
    },

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, ServiceError::LaunchFailure { .. })
    }
}
