//! Axum HTTP surface for Notiflow.
//!
//! The web layer is a thin imperative shell: it parses the delivery body,
//! opens the request scope, calls the router, and maps the outcome to a
//! status code. All decisions live in `notiflow-runtime`.
//!
//! # Request Flow
//!
//! 1. **Correlation layer** assigns or reuses `X-Correlation-ID`
//! 2. **Lifecycle check** refuses deliveries once shutdown started (503)
//! 3. **Scope** opened with the request's correlation id and settings
//! 4. **Dispatch** through the router (flow control, grouping, handler)
//! 5. **Map** the [`DispatchOutcome`](notiflow_runtime::DispatchOutcome) to
//!    HTTP and echo the correlation id
//!
//! # Example
//!
//! ```ignore
//! use notiflow_web::{build_router, AppState};
//!
//! let state = AppState::new(router, scopes, lifecycle);
//! let app = build_router(state);
//! axum::serve(listener, app).await?;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::AppError;
pub use extractors::CorrelationId;
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the HTTP router.
///
/// ```text
/// POST /notify         single or batch delivery (per isBatch)
/// POST /batch          batch delivery
/// GET  /health         liveness
/// GET  /health/ready   readiness
/// GET  /metrics        Prometheus scrape
/// ```
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/notify", post(handlers::notify))
        .route("/batch", post(handlers::batch))
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/metrics", get(handlers::metrics::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
