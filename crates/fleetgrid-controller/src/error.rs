use thiserror::Error;

use fleet_core::ServiceError;
use fleetgrid_demand::EstimationError;
use fleetgrid_placement::PlacementError;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("collaborator error: {0}")]
    Service(#[from] ServiceError),

    #[error("estimation error: {0}")]
    Estimation(#[from] EstimationError),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),
}
