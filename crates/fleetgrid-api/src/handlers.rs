//! REST API handlers.
//!
//! Each handler reads the latest snapshot and returns JSON.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::debug;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.latest())
}

/// GET /api/v1/targets
pub async fn list_targets(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.latest().targets)
}

/// GET /api/v1/targets/:name
pub async fn get_target(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let snapshot = state.latest();
    match snapshot.target(&name) {
        Some(target) => ApiResponse::ok(target.clone()).into_response(),
        None => {
            debug!(target = %name, "status lookup for unknown target");
            error_response("target not found", StatusCode::NOT_FOUND).into_response()
        }
    }
}

/// GET /api/v1/ledger
pub async fn ledger(State(state): State<ApiState>) -> impl IntoResponse {
    let view = state.latest().ledger;
    ApiResponse::ok(serde_json::json!({
        "utilization": view.utilization(),
        "ledger": view,
    }))
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = crate::render_prometheus(&state.latest());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;

    use fleetgrid_controller::FleetSnapshot;

    fn test_state() -> ApiState {
        let (_tx, rx) = watch::channel(FleetSnapshot::default());
        ApiState { snapshots: rx }
    }

    #[tokio::test]
    async fn status_on_empty_snapshot() {
        let resp = status(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_nonexistent_target() {
        let resp = get_target(State(test_state()), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_content_type() {
        let resp = prometheus_metrics(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["content-type"],
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }
}
