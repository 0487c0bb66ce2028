//! Handler contract.
//!
//! A handler is the opaque downstream capability the router invokes and waits
//! on. It receives an ordered sequence of records plus the request scope and
//! reports one of three outcomes.

use crate::scope::{ClientError, RequestScope};
use async_trait::async_trait;
use notiflow_core::Record;
use serde::Serialize;
use thiserror::Error;

/// Result of a handler invocation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HandlerOutcome {
    /// Records were processed.
    Accepted,
    /// Records were refused and should not be retried as-is.
    Rejected(String),
    /// Records were taken but processing was postponed.
    Deferred,
}

impl HandlerOutcome {
    /// Combine outcomes of several invocations on the same request.
    ///
    /// A rejection outranks a deferral, which outranks acceptance. The first
    /// rejection reason is kept.
    #[must_use]
    pub fn combine(self, next: Self) -> Self {
        match (self, next) {
            (rejected @ Self::Rejected(_), _) | (_, rejected @ Self::Rejected(_)) => rejected,
            (Self::Deferred, _) | (_, Self::Deferred) => Self::Deferred,
            (Self::Accepted, Self::Accepted) => Self::Accepted,
        }
    }
}

/// Unrecovered handler failure.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The shared client failed in a way the handler could not recover from.
    #[error("shared client failed: {0}")]
    Client(#[from] ClientError),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Downstream capability invoked for a topic.
///
/// # Example
///
/// ```ignore
/// struct AuditHandler;
///
/// #[async_trait]
/// impl Handler for AuditHandler {
///     async fn handle(
///         &self,
///         records: Vec<Record>,
///         scope: &RequestScope,
///     ) -> Result<HandlerOutcome, HandlerError> {
///         tracing::info!(correlation_id = %scope.correlation_id(), count = records.len(), "audit");
///         Ok(HandlerOutcome::Accepted)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process `records` within `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] for unrecovered failures. The router converts
    /// these into a generic server error; the scope is still released.
    async fn handle(
        &self,
        records: Vec<Record>,
        scope: &RequestScope,
    ) -> Result<HandlerOutcome, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine() {
        use HandlerOutcome::{Accepted, Deferred, Rejected};

        assert_eq!(Accepted.combine(Accepted), Accepted);
        assert_eq!(Accepted.combine(Deferred), Deferred);
        assert_eq!(Deferred.combine(Accepted), Deferred);
        assert_eq!(
            Rejected("first".into()).combine(Rejected("second".into())),
            Rejected("first".into())
        );
        assert_eq!(Deferred.combine(Rejected("r".into())), Rejected("r".into()));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(HandlerOutcome::Rejected("bad".into())).ok();
        assert_eq!(json, Some(serde_json::json!({"status": "rejected", "reason": "bad"})));
    }
}
