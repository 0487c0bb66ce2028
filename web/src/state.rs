//! Application state shared by all HTTP handlers.

use notiflow_runtime::metrics::MetricsRecorder;
use notiflow_runtime::{LifecycleManager, NotificationRouter, ScopeProvider};
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cheap to clone; every field is reference counted.
///
/// # Examples
///
/// ```ignore
/// let state = AppState::new(Arc::new(router), scopes, lifecycle);
/// let app = build_router(state);
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Topic router with its flow controller
    pub router: Arc<NotificationRouter>,
    /// Request scope factory
    pub scopes: ScopeProvider,
    /// Process lifecycle
    pub lifecycle: Arc<LifecycleManager>,
    /// Prometheus exposition, if installed
    pub metrics: Arc<MetricsRecorder>,
}

impl AppState {
    /// Create state without an installed metrics recorder.
    #[must_use]
    pub fn new(
        router: Arc<NotificationRouter>,
        scopes: ScopeProvider,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            router,
            scopes,
            lifecycle,
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    /// Use an installed metrics recorder for `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("router", &self.router)
            .field("scopes", &self.scopes)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync + 'static>() {}
        assert_clone::<AppState>();
    }
}
