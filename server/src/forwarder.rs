//! Downstream forwarding.
//!
//! [`HttpForwarder`] is the process-wide shared client: one `reqwest` pool
//! created at startup, owned by the lifecycle manager, reached from request
//! scopes through a weak reference. [`ForwardingHandler`] is the default
//! handler registered for every known topic.

use crate::config::DownstreamConfig;
use async_trait::async_trait;
use notiflow_core::Record;
use notiflow_runtime::{
    ClientError, Disposable, DisposeError, Handler, HandlerError, HandlerOutcome, RequestScope,
    SharedClient,
};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Topics served by the default deployment.
pub const DEFAULT_TOPICS: [&str; 4] = [
    "user:update",
    "account:update",
    "segment:update",
    "ship:update",
];

const MAX_ERROR_BODY: usize = 512;

/// Body posted downstream.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForwardBody<'a> {
    topic: &'a str,
    correlation_id: Uuid,
    records: &'a [Record],
}

/// HTTP client for the processing tier.
pub struct HttpForwarder {
    client: Client,
    base_url: Option<String>,
    closed: AtomicBool,
}

impl HttpForwarder {
    /// Build the forwarder and its connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &DownstreamConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if config.url.is_none() {
            tracing::warn!("DOWNSTREAM_URL not set, notifications will only be logged");
        }

        Ok(Self {
            client,
            base_url: config
                .url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            closed: AtomicBool::new(false),
        })
    }

    /// Stop accepting forwards. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!(base_url = ?self.base_url, "Downstream forwarder closed");
        }
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for HttpForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpForwarder")
            .field("base_url", &self.base_url)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SharedClient for HttpForwarder {
    fn name(&self) -> &str {
        "http-forwarder"
    }

    async fn forward(
        &self,
        topic: &str,
        records: &[Record],
        correlation_id: Uuid,
    ) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let Some(base_url) = &self.base_url else {
            tracing::info!(
                correlation_id = %correlation_id,
                topic,
                records = records.len(),
                "No downstream configured, notification logged only"
            );
            return Ok(());
        };

        let response = self
            .client
            .post(format!("{base_url}/{topic}"))
            .header("X-Correlation-ID", correlation_id.to_string())
            .json(&ForwardBody {
                topic,
                correlation_id,
                records,
            })
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                correlation_id = %correlation_id,
                topic,
                status = status.as_u16(),
                "Forwarded downstream"
            );
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Disposable for HttpForwarder {
    fn name(&self) -> &str {
        "http-forwarder"
    }

    async fn dispose(&self) -> Result<(), DisposeError> {
        self.close();
        Ok(())
    }
}

/// Default handler: forward records to the processing tier.
///
/// | Downstream result | Outcome |
/// |---|---|
/// | 2xx | `Accepted` |
/// | 429, 503 | `Deferred` |
/// | other 4xx | `Rejected` |
/// | client gone or closed | `Deferred` |
/// | transport error, other 5xx | `HandlerError` |
#[derive(Debug, Clone)]
pub struct ForwardingHandler {
    topic: String,
}

impl ForwardingHandler {
    /// Handler forwarding under `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl Handler for ForwardingHandler {
    async fn handle(
        &self,
        records: Vec<Record>,
        scope: &RequestScope,
    ) -> Result<HandlerOutcome, HandlerError> {
        let correlation_id = scope.correlation_id();
        let Some(client) = scope.client() else {
            tracing::warn!(
                correlation_id = %correlation_id,
                topic = %self.topic,
                "Shared client released, deferring"
            );
            return Ok(HandlerOutcome::Deferred);
        };

        match client.forward(&self.topic, &records, correlation_id).await {
            Ok(()) => Ok(HandlerOutcome::Accepted),
            Err(ClientError::Closed) => Ok(HandlerOutcome::Deferred),
            Err(ClientError::Status { status, .. })
                if status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || status == StatusCode::SERVICE_UNAVAILABLE.as_u16() =>
            {
                Ok(HandlerOutcome::Deferred)
            }
            Err(ClientError::Status { status, body }) if (400..500).contains(&status) => {
                Ok(HandlerOutcome::Rejected(format!(
                    "downstream responded {status}: {body}"
                )))
            }
            Err(error) => Err(HandlerError::Client(error)),
        }
    }
}
