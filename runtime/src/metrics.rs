//! Prometheus metrics for observability and monitoring.
//!
//! Covers every stage of a delivery:
//! - Intake (received, ignored)
//! - Flow control (admitted, rate limited)
//! - Request scopes (currently open)
//! - Handler execution (duration, failures)
//! - Lifecycle (disposal failures)
//!
//! # Example
//!
//! ```rust,no_run
//! use notiflow_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // Served by the web layer at GET /metrics
//! let body = recorder.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use notiflow_core::DeliveryPath;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the global Prometheus recorder and renders the exposition text.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this
    /// succeeds without a handle and [`render`](Self::render) returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the Prometheus handle, if this instance installed the recorder.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

fn register_metrics() {
    // Intake
    describe_counter!(
        "notifications_received_total",
        "Total number of delivery requests received, by path"
    );
    describe_counter!(
        "notifications_ignored_total",
        "Total number of deliveries for topics without a handler"
    );

    // Flow control
    describe_counter!(
        "notifications_admitted_total",
        "Total number of single-event deliveries admitted by flow control"
    );
    describe_counter!(
        "notifications_rate_limited_total",
        "Total number of single-event deliveries rejected by flow control"
    );

    // Scopes
    describe_gauge!("request_scopes_open", "Number of request scopes currently open");

    // Handlers
    describe_histogram!(
        "handler_duration_seconds",
        "Time taken by handler invocations for one delivery"
    );
    describe_counter!(
        "handler_failures_total",
        "Total number of deliveries whose handler failed or panicked"
    );

    // Lifecycle
    describe_counter!(
        "lifecycle_disposal_failures_total",
        "Total number of shared resources that failed to dispose"
    );
}

/// Flow control metrics recorder.
pub struct FlowControlMetrics;

impl FlowControlMetrics {
    /// Record an admitted delivery.
    pub fn record_admitted() {
        counter!("notifications_admitted_total").increment(1);
    }

    /// Record a delivery rejected by the window.
    pub fn record_rate_limited() {
        counter!("notifications_rate_limited_total").increment(1);
    }
}

/// Request scope metrics recorder.
pub struct ScopeMetrics;

impl ScopeMetrics {
    /// Record the number of open scopes.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_open(open: usize) {
        gauge!("request_scopes_open").set(open as f64);
    }
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record an inbound delivery.
    pub fn record_received(path: DeliveryPath) {
        counter!("notifications_received_total", "path" => path.as_str()).increment(1);
    }

    /// Record a delivery for an unrouted topic.
    pub fn record_ignored() {
        counter!("notifications_ignored_total").increment(1);
    }

    /// Record how long the handler took.
    pub fn record_handler_duration(duration: Duration) {
        histogram!("handler_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a handler failure.
    pub fn record_handler_failure() {
        counter!("handler_failures_total").increment(1);
    }
}

/// Lifecycle metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record a resource that failed to dispose.
    pub fn record_disposal_failure(resource: &str) {
        counter!("lifecycle_disposal_failures_total", "resource" => resource.to_string())
            .increment(1);
    }
}
