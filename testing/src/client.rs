//! Mock shared client.

use async_trait::async_trait;
use notiflow_core::Record;
use notiflow_runtime::{ClientError, Disposable, DisposeError, SharedClient};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// One captured forward call.
#[derive(Debug, Clone, PartialEq)]
pub struct Forwarded {
    /// Topic forwarded
    pub topic: String,
    /// Records forwarded
    pub records: Vec<Record>,
    /// Correlation id propagated with the call
    pub correlation_id: Uuid,
}

/// In-memory [`SharedClient`] that records forwards and counts disposals.
///
/// After `dispose()` every forward fails with [`ClientError::Closed`].
#[derive(Debug, Default)]
pub struct MockSharedClient {
    forwarded: Mutex<Vec<Forwarded>>,
    failure: Mutex<Option<ClientError>>,
    dispose_failure: Option<String>,
    closed: AtomicBool,
    disposals: AtomicUsize,
}

impl MockSharedClient {
    /// Healthy client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose `dispose()` reports an error (after marking itself closed).
    #[must_use]
    pub fn failing_dispose(reason: impl Into<String>) -> Self {
        Self {
            dispose_failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Make every subsequent forward fail with `error`.
    pub fn fail_with(&self, error: ClientError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Captured forwards, in order.
    #[must_use]
    pub fn forwarded(&self) -> Vec<Forwarded> {
        self.forwarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `dispose()` ran.
    #[must_use]
    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    /// Whether the client has been disposed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SharedClient for MockSharedClient {
    fn name(&self) -> &str {
        "mock-client"
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
        if let Some(error) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }
        self.forwarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Forwarded {
                topic: topic.to_string(),
                records: records.to_vec(),
                correlation_id,
            });
        Ok(())
    }
}

#[async_trait]
impl Disposable for MockSharedClient {
    fn name(&self) -> &str {
        "mock-client"
    }

    async fn dispose(&self) -> Result<(), DisposeError> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        match &self.dispose_failure {
            Some(reason) => Err(DisposeError::new("mock-client", reason.clone())),
            None => Ok(()),
        }
    }
}
