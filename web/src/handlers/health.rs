//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to decide whether to route
//! deliveries to this instance.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use notiflow_runtime::LifecycleState;
use serde::Serialize;

/// Liveness probe.
///
/// Returns 200 OK while the process is up, whatever the lifecycle state.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness body.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    /// Lifecycle state label
    pub state: &'static str,
    /// Request scopes currently open
    pub open_scopes: usize,
}

/// Readiness probe.
///
/// # Status Codes
///
/// - 200 OK: lifecycle is `Running`
/// - 503 Service Unavailable: draining, shutting down or disposed
///
/// ```text
/// GET /health/ready
/// ```
///
/// ```json
/// {"state": "running", "openScopes": 0}
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let lifecycle = state.lifecycle.state();
    let status = if state.lifecycle.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let label = if lifecycle == LifecycleState::Running && state.lifecycle.is_draining() {
        "draining"
    } else {
        lifecycle.as_str()
    };

    (
        status,
        Json(Readiness {
            state: label,
            open_scopes: state.scopes.open_scopes(),
        }),
    )
}
