//! fleetgrid-api — read-only status surface for the fleet engine.
//!
//! Every handler reads the latest [`FleetSnapshot`] published by the
//! supervisor. Nothing here mutates controller state.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/status` | Full snapshot of the last tick |
//! | GET | `/api/v1/targets` | Per-target demand, in-flight and state |
//! | GET | `/api/v1/targets/{name}` | One target |
//! | GET | `/api/v1/ledger` | Ledger utilization vs budget |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod prometheus;

use axum::Router;
use axum::routing::get;
use tokio::sync::watch;

use fleetgrid_controller::FleetSnapshot;

pub use prometheus::render_prometheus;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub snapshots: watch::Receiver<FleetSnapshot>,
}

impl ApiState {
    /// Clone of the most recently published snapshot.
    pub fn latest(&self) -> FleetSnapshot {
        self.snapshots.borrow().clone()
    }
}

/// Build the complete API router (REST + metrics).
pub fn build_router(snapshots: watch::Receiver<FleetSnapshot>) -> Router {
    let state = ApiState { snapshots };

    let api_routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/targets", get(handlers::list_targets))
        .route("/targets/{name}", get(handlers::get_target))
        .route("/ledger", get(handlers::ledger))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
