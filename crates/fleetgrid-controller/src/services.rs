use std::sync::Arc;

use fleet_core::{Clock, ExecutionService, TelemetryService, TopologyService};

/// The collaborators a controller talks to.
#[derive(Clone)]
pub struct Services {
    pub exec: Arc<dyn ExecutionService>,
    pub topology: Arc<dyn TopologyService>,
    pub telemetry: Arc<dyn TelemetryService>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// All four roles served by one backend.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ExecutionService + TopologyService + TelemetryService + Clock + 'static,
    {
        Self {
            exec: backend.clone(),
            topology: backend.clone(),
            telemetry: backend.clone(),
            clock: backend,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
