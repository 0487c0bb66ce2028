//! Request-scoped resources.
//!
//! Every inbound delivery gets its own [`RequestScope`]:
//!
//! - a correlation id used to trace the request's effects across logs
//! - the settings resolved for this request
//! - a weak reference to the process-wide shared client
//!
//! The scope is a plain value passed explicitly into the handler. There is no
//! ambient container. Release is tied to `Drop`, so it happens on every exit
//! path: success, handler failure, rate limiting, or a panicking handler.

use crate::metrics::ScopeMetrics;
use async_trait::async_trait;
use notiflow_core::Record;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Opaque per-request settings.
pub type Settings = Map<String, Value>;

/// Errors raised by the shared downstream client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The client has been disposed.
    #[error("shared client is closed")]
    Closed,

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Downstream answered with a non-success status.
    #[error("downstream responded {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (truncated by the client if large)
        body: String,
    },
}

/// Process-wide client used by handlers to reach the processing tier.
///
/// Exactly one instance exists per process. It is owned by the
/// [`LifecycleManager`](crate::LifecycleManager) and reached from scopes
/// through a `Weak` reference.
#[async_trait]
pub trait SharedClient: Send + Sync {
    /// Human-readable client name (for logs).
    fn name(&self) -> &str;

    /// Forward records for `topic` downstream.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the client is closed, the transport fails,
    /// or downstream answers with a non-success status.
    async fn forward(
        &self,
        topic: &str,
        records: &[Record],
        correlation_id: Uuid,
    ) -> Result<(), ClientError>;
}

/// Resources bound to exactly one delivery request.
pub struct RequestScope {
    correlation_id: Uuid,
    settings: Settings,
    client: Option<Weak<dyn SharedClient>>,
    opened_at: Instant,
    open_scopes: Arc<AtomicUsize>,
}

impl RequestScope {
    /// Correlation id for this request.
    #[must_use]
    pub const fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Settings resolved for this request.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Look up a single setting.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Shared client, if it is still alive.
    ///
    /// Returns `None` once the lifecycle manager has released the singleton.
    #[must_use]
    pub fn client(&self) -> Option<Arc<dyn SharedClient>> {
        self.client.as_ref().and_then(Weak::upgrade)
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        let open = self.open_scopes.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        ScopeMetrics::record_open(open);
        tracing::debug!(
            correlation_id = %self.correlation_id,
            elapsed_ms = self.opened_at.elapsed().as_millis(),
            "Request scope released"
        );
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("correlation_id", &self.correlation_id)
            .field("settings", &self.settings)
            .field("client_alive", &self.client().is_some())
            .finish_non_exhaustive()
    }
}

/// Creates [`RequestScope`]s.
///
/// Holds the process default settings and a weak handle to the shared client.
/// It never opens connections and never mutates the defaults.
#[derive(Clone)]
pub struct ScopeProvider {
    defaults: Arc<Settings>,
    client: Option<Weak<dyn SharedClient>>,
    open_scopes: Arc<AtomicUsize>,
}

impl ScopeProvider {
    /// Create a provider with process default settings and no shared client.
    #[must_use]
    pub fn new(defaults: Settings) -> Self {
        Self {
            defaults: Arc::new(defaults),
            client: None,
            open_scopes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attach the process-wide shared client.
    ///
    /// Only a weak reference is kept; ownership stays with the caller
    /// (normally the lifecycle manager).
    #[must_use]
    pub fn with_client(mut self, client: &Arc<dyn SharedClient>) -> Self {
        self.client = Some(Arc::downgrade(client));
        self
    }

    /// Process default settings.
    #[must_use]
    pub fn defaults(&self) -> &Settings {
        &self.defaults
    }

    /// Number of scopes currently open.
    #[must_use]
    pub fn open_scopes(&self) -> usize {
        self.open_scopes.load(Ordering::SeqCst)
    }

    /// Open a scope with a fresh correlation id.
    #[must_use]
    pub fn open_scope(&self, snapshot: Option<&Settings>) -> RequestScope {
        self.open_scope_with_id(Uuid::new_v4(), snapshot)
    }

    /// Open a scope for an already-assigned correlation id.
    ///
    /// The scope's settings are the process defaults overlaid with the
    /// request's settings snapshot.
    #[must_use]
    pub fn open_scope_with_id(
        &self,
        correlation_id: Uuid,
        snapshot: Option<&Settings>,
    ) -> RequestScope {
        let mut settings = (*self.defaults).clone();
        if let Some(snapshot) = snapshot {
            settings.extend(snapshot.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let open = self.open_scopes.fetch_add(1, Ordering::SeqCst) + 1;
        ScopeMetrics::record_open(open);
        tracing::debug!(correlation_id = %correlation_id, "Request scope opened");

        RequestScope {
            correlation_id,
            settings,
            client: self.client.clone(),
            opened_at: Instant::now(),
            open_scopes: Arc::clone(&self.open_scopes),
        }
    }
}

impl std::fmt::Debug for ScopeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeProvider")
            .field("defaults", &self.defaults)
            .field("open_scopes", &self.open_scopes())
            .finish_non_exhaustive()
    }
}
