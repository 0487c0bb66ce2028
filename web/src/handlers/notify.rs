//! Delivery endpoints.
//!
//! Both endpoints accept the same JSON body and hand it to the
//! [`NotificationRouter`](notiflow_runtime::NotificationRouter). This module
//! only translates the resulting [`DispatchOutcome`] into HTTP.
//!
//! | Outcome | Status |
//! |---|---|
//! | accepted / ignored / empty | 200 |
//! | deferred | 202 |
//! | rejected by handler | 422 |
//! | rate limited | 429 + `Retry-After` |
//! | handler failure | 500 |
//! | shutting down | 503 |
//! | malformed body | 400 |

use crate::error::AppError;
use crate::extractors::CorrelationId;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use notiflow_core::{DeliveryRequest, FlowControlHint};
use notiflow_runtime::{DispatchOutcome, HandlerOutcome};
use serde::Serialize;
use uuid::Uuid;

/// Successful delivery response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    /// `accepted`, `ignored`, `deferred` or `rejected`
    pub status: &'static str,
    /// Records handed to the handler after grouping
    pub records: usize,
    /// Rejection reason from the handler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Pacing hint for the sender (single-event path only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_control: Option<FlowControlHint>,
    /// Correlation id of the request
    pub correlation_id: Uuid,
}

impl DeliveryResponse {
    const fn new(status: &'static str, records: usize, correlation_id: Uuid) -> Self {
        Self {
            status,
            records,
            reason: None,
            flow_control: None,
            correlation_id,
        }
    }
}

/// Deliver a notification.
///
/// ```text
/// POST /notify
/// ```
///
/// Takes the batch path only when the body says `"isBatch": true`.
///
/// # Errors
///
/// See the module table.
pub async fn notify(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    body: Result<Json<DeliveryRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body?;
    deliver(&state, correlation_id, request).await
}

/// Deliver a batch.
///
/// ```text
/// POST /batch
/// ```
///
/// Always takes the batch path: never flow controlled, no grouping unless
/// `groupTraits` is `true`.
///
/// # Errors
///
/// See the module table.
pub async fn batch(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    body: Result<Json<DeliveryRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body?;
    deliver(&state, correlation_id, request.into_batch()).await
}

async fn deliver(
    state: &AppState,
    correlation_id: Uuid,
    request: DeliveryRequest,
) -> Result<Response, AppError> {
    if !state.lifecycle.is_running() {
        return Err(AppError::unavailable("Service is shutting down")
            .with_correlation_id(correlation_id));
    }

    let scope = state
        .scopes
        .open_scope_with_id(correlation_id, request.settings.as_ref());
    let outcome = state.router.dispatch(scope, request).await;

    into_response(outcome, correlation_id)
}

fn into_response(outcome: DispatchOutcome, correlation_id: Uuid) -> Result<Response, AppError> {
    match outcome {
        DispatchOutcome::Ignored => Ok(respond(
            StatusCode::OK,
            DeliveryResponse::new("ignored", 0, correlation_id),
        )),
        DispatchOutcome::Empty => Ok(respond(
            StatusCode::OK,
            DeliveryResponse::new("accepted", 0, correlation_id),
        )),
        DispatchOutcome::Handled {
            outcome,
            records,
            hint,
        } => {
            let (status, mut body) = match outcome {
                HandlerOutcome::Accepted => (
                    StatusCode::OK,
                    DeliveryResponse::new("accepted", records, correlation_id),
                ),
                HandlerOutcome::Deferred => (
                    StatusCode::ACCEPTED,
                    DeliveryResponse::new("deferred", records, correlation_id),
                ),
                HandlerOutcome::Rejected(reason) => {
                    let mut body = DeliveryResponse::new("rejected", records, correlation_id);
                    body.reason = Some(reason);
                    (StatusCode::UNPROCESSABLE_ENTITY, body)
                }
            };
            body.flow_control = hint;
            Ok(respond(status, body))
        }
        DispatchOutcome::RateLimited {
            retry_after_ms,
            hint,
        } => Err(AppError::rate_limited(retry_after_ms, hint)),
        DispatchOutcome::Failed { correlation_id, .. } => {
            Err(AppError::internal("Notification handling failed")
                .with_correlation_id(correlation_id))
        }
    }
}

fn respond(status: StatusCode, body: DeliveryResponse) -> Response {
    (status, Json(body)).into_response()
}
