//! Custom Axum extractors.

use crate::middleware::{parse_correlation_id, CORRELATION_ID_HEADER};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Resolution order:
///
/// 1. The id stored by [`correlation_id_layer`](crate::correlation_id_layer)
/// 2. A valid `X-Correlation-ID` header
/// 3. A fresh UUID v4
///
/// # Example
///
/// ```ignore
/// async fn handler(correlation_id: CorrelationId) -> String {
///     format!("Request ID: {}", correlation_id.0)
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .or_else(|| parse_correlation_id(parts.headers.get(CORRELATION_ID_HEADER)))
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}
