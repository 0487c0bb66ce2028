//! Topic routing and dispatch.
//!
//! The [`NotificationRouter`] maps an event topic to zero or one handler and
//! turns an inbound [`DeliveryRequest`] into a [`DispatchOutcome`]. The web
//! layer only translates that outcome into an HTTP response.
//!
//! # Dispatch Flow
//!
//! ```text
//! topic lookup ──(unknown)──────────────────────────────> Ignored
//!      │
//!      ├─ single: empty? ─> Empty
//!      │          admit()? ─(no)──────────────────────────> RateLimited
//!      │          group(groupTraits, default true) ─> handler ×1
//!      │
//!      └─ batch:  group(groupTraits, default false) ─> handler ×N (in order)
//!                                                       │
//!                           Handled { outcome } <───────┤
//!                           Failed                <─────┘ (error or panic)
//! ```
//!
//! Handler work runs in its own task which owns the scope. If the inbound
//! connection goes away mid-handler, the handler still runs to completion and
//! the scope is released when it does.

use crate::flow_control::FlowController;
use crate::handler::{Handler, HandlerError, HandlerOutcome};
use crate::metrics::DispatchMetrics;
use crate::scope::RequestScope;
use notiflow_core::{group, DeliveryPath, DeliveryRequest, FlowControlHint, Record};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Result of dispatching one delivery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler is registered for the topic.
    Ignored,

    /// The request carried no records; nothing was invoked.
    Empty,

    /// The handler ran and reported an outcome.
    Handled {
        /// Combined handler outcome
        outcome: HandlerOutcome,
        /// Number of records handed to the handler after grouping
        records: usize,
        /// Flow control hint for the sender (single-event path only)
        hint: Option<FlowControlHint>,
    },

    /// The flow control window is full; the sender should slow down.
    RateLimited {
        /// Advised delay before retrying
        retry_after_ms: u64,
        /// Flow control hint for the sender
        hint: FlowControlHint,
    },

    /// The handler failed or panicked.
    Failed {
        /// Correlation id of the failed request
        correlation_id: Uuid,
        /// Failure description (for logs, not for clients)
        error: String,
    },
}

/// Maps topics to handlers and dispatches deliveries.
pub struct NotificationRouter {
    handlers: HashMap<String, Arc<dyn Handler>>,
    flow_control: FlowController,
}

impl NotificationRouter {
    /// Start building a router around a flow controller.
    #[must_use]
    pub fn builder(flow_control: FlowController) -> RouterBuilder {
        RouterBuilder {
            handlers: HashMap::new(),
            flow_control,
        }
    }

    /// Registered topics.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Whether a handler is registered for `topic`.
    #[must_use]
    pub fn handles(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    /// The flow controller consulted on the single-event path.
    #[must_use]
    pub const fn flow_control(&self) -> &FlowController {
        &self.flow_control
    }

    /// Dispatch `request` within `scope`.
    ///
    /// The scope is consumed: it is released when this call returns or, if a
    /// handler was started, when the handler finishes.
    pub async fn dispatch(&self, scope: RequestScope, request: DeliveryRequest) -> DispatchOutcome {
        let correlation_id = scope.correlation_id();
        let path = request.path();
        DispatchMetrics::record_received(path);

        let Some(handler) = self.handlers.get(&request.topic).cloned() else {
            tracing::debug!(
                correlation_id = %correlation_id,
                topic = %request.topic,
                "No handler registered, ignoring notification"
            );
            DispatchMetrics::record_ignored();
            return DispatchOutcome::Ignored;
        };

        if request.records.is_empty() {
            tracing::debug!(
                correlation_id = %correlation_id,
                topic = %request.topic,
                "Empty delivery"
            );
            return DispatchOutcome::Empty;
        }

        let group_traits = request.group_traits();
        let DeliveryRequest { topic, records, .. } = request;

        let (invocations, hint) = match path {
            DeliveryPath::Single => {
                let verdict = self.flow_control.admit();
                if let Some(retry_after_ms) = verdict.retry_after_ms {
                    tracing::info!(
                        correlation_id = %correlation_id,
                        topic = %topic,
                        retry_after_ms,
                        "Notification rate limited"
                    );
                    return DispatchOutcome::RateLimited {
                        retry_after_ms,
                        hint: self.flow_control.config().retry_hint(),
                    };
                }
                let grouped = group(records, group_traits);
                (vec![grouped], Some(self.flow_control.config().hint()))
            }
            DeliveryPath::Batch => {
                let grouped = group(records, group_traits);
                (grouped.into_iter().map(|r| vec![r]).collect(), None)
            }
        };

        let record_count = invocations.iter().map(Vec::len).sum();
        tracing::debug!(
            correlation_id = %correlation_id,
            topic = %topic,
            records = record_count,
            invocations = invocations.len(),
            "Dispatching to handler"
        );

        let started = Instant::now();
        let task = tokio::spawn(invoke(handler, scope, invocations));
        let result = match task.await {
            Ok(result) => result,
            Err(join_error) => Err(HandlerError::Panicked(join_error.to_string())),
        };
        DispatchMetrics::record_handler_duration(started.elapsed());

        match result {
            Ok(outcome) => {
                tracing::info!(
                    correlation_id = %correlation_id,
                    topic = %topic,
                    records = record_count,
                    outcome = ?outcome,
                    "Notification handled"
                );
                DispatchOutcome::Handled {
                    outcome,
                    records: record_count,
                    hint,
                }
            }
            Err(error) => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    topic = %topic,
                    error = %error,
                    "Handler failed"
                );
                DispatchMetrics::record_handler_failure();
                DispatchOutcome::Failed {
                    correlation_id,
                    error: error.to_string(),
                }
            }
        }
    }
}

/// Run the handler once per invocation, in order, stopping at the first error.
async fn invoke(
    handler: Arc<dyn Handler>,
    scope: RequestScope,
    invocations: Vec<Vec<Record>>,
) -> Result<HandlerOutcome, HandlerError> {
    let mut combined = HandlerOutcome::Accepted;
    for records in invocations {
        let outcome = handler.handle(records, &scope).await?;
        combined = combined.combine(outcome);
    }
    Ok(combined)
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut topics: Vec<_> = self.topics().collect();
        topics.sort_unstable();
        f.debug_struct("NotificationRouter")
            .field("topics", &topics)
            .field("flow_control", &self.flow_control)
            .finish()
    }
}

/// Builder for [`NotificationRouter`]. The mapping is fixed once built.
pub struct RouterBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
    flow_control: FlowController,
}

impl RouterBuilder {
    /// Register `handler` for `topic`, replacing any earlier registration.
    #[must_use]
    pub fn route(mut self, topic: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        let topic = topic.into();
        if self.handlers.insert(topic.clone(), handler).is_some() {
            tracing::warn!(topic = %topic, "Handler replaced for topic");
        }
        self
    }

    /// Register one handler for several topics.
    #[must_use]
    pub fn routes<I, T>(self, topics: I, handler: &Arc<dyn Handler>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        topics
            .into_iter()
            .fold(self, |builder, topic| builder.route(topic, Arc::clone(handler)))
    }

    /// Finish the router.
    #[must_use]
    pub fn build(self) -> NotificationRouter {
        NotificationRouter {
            handlers: self.handlers,
            flow_control: self.flow_control,
        }
    }
}
