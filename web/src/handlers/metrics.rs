//! Prometheus scrape endpoint.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

/// Render metrics in Prometheus text format.
///
/// ```text
/// GET /metrics
/// ```
///
/// # Errors
///
/// 503 if this process never installed the recorder.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> Result<Response, AppError> {
    let body = state
        .metrics
        .render()
        .ok_or_else(|| AppError::unavailable("Metrics recorder not installed"))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
