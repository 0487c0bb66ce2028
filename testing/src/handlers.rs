//! Scriptable handler that records every invocation.

use async_trait::async_trait;
use notiflow_core::Record;
use notiflow_runtime::{Handler, HandlerError, HandlerOutcome, RequestScope, Settings};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// What the handler does on one invocation.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return this outcome.
    Respond(HandlerOutcome),
    /// Return `HandlerError::Failed` with this message.
    Fail(String),
    /// Panic.
    Panic,
}

/// One captured handler call.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Records as handed to the handler
    pub records: Vec<Record>,
    /// Correlation id of the scope
    pub correlation_id: Uuid,
    /// Settings visible through the scope
    pub settings: Settings,
    /// Whether the scope could still reach the shared client
    pub client_alive: bool,
}

/// Handler that records calls and follows a script.
///
/// Scripted behaviors are consumed in order; once the script runs out every
/// call uses the fallback behavior.
///
/// # Example
///
/// ```
/// use notiflow_runtime::HandlerOutcome;
/// use notiflow_testing::{Behavior, RecordingHandler};
///
/// let handler = RecordingHandler::accepting()
///     .then(Behavior::Respond(HandlerOutcome::Deferred))
///     .then(Behavior::Fail("downstream down".into()));
/// assert!(handler.invocations().is_empty());
/// ```
#[derive(Debug)]
pub struct RecordingHandler {
    fallback: Behavior,
    script: Mutex<VecDeque<Behavior>>,
    delay: Option<Duration>,
    invocations: Mutex<Vec<Invocation>>,
}

impl RecordingHandler {
    /// Handler that always follows `behavior`.
    #[must_use]
    pub fn new(behavior: Behavior) -> Self {
        Self {
            fallback: behavior,
            script: Mutex::new(VecDeque::new()),
            delay: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Handler that always accepts.
    #[must_use]
    pub fn accepting() -> Self {
        Self::new(Behavior::Respond(HandlerOutcome::Accepted))
    }

    /// Handler that always fails.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(Behavior::Fail(message.into()))
    }

    /// Handler that always panics.
    #[must_use]
    pub fn panicking() -> Self {
        Self::new(Behavior::Panic)
    }

    /// Queue a one-shot behavior ahead of the fallback.
    #[must_use]
    pub fn then(self, behavior: Behavior) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(behavior);
        self
    }

    /// Sleep this long before responding.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Captured calls, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_behavior(&self) -> Behavior {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    #[allow(clippy::panic)]
    async fn handle(
        &self,
        records: Vec<Record>,
        scope: &RequestScope,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Invocation {
                records,
                correlation_id: scope.correlation_id(),
                settings: scope.settings().clone(),
                client_alive: scope.client().is_some(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_behavior() {
            Behavior::Respond(outcome) => Ok(outcome),
            Behavior::Fail(message) => Err(HandlerError::Failed(message)),
            Behavior::Panic => panic!("scripted handler panic"),
        }
    }
}
