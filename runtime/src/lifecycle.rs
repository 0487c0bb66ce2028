//! Lifecycle of process-wide singletons.
//!
//! The [`LifecycleManager`] owns every resource that lives for the whole
//! process (the shared downstream client, mainly) and releases them on
//! shutdown. Shutdown may be requested from several places at once: the HTTP
//! server's close path and the OS signal handler. Only the first request does
//! any work.
//!
//! # State Machine
//!
//! ```text
//! Running ──shutdown()──> ShuttingDown ──(all disposed)──> Disposed
//!    │                          │                             │
//!    └── register() ok          └── shutdown() is a no-op ────┘
//! ```
//!
//! The state is a single atomic updated with compare-and-swap, so two
//! concurrent `shutdown()` calls can never both win the transition.
//!
//! Each `dispose()` is bounded by the dispose timeout. A resource that does
//! not finish in time is logged as a disposal failure and the manager moves
//! on, so `shutdown()` always reaches `Disposed`.

use crate::metrics::LifecycleMetrics;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Process lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Serving requests.
    Running = 0,
    /// Shutdown started; resources are being released.
    ShuttingDown = 1,
    /// All resources released.
    Disposed = 2,
}

impl LifecycleState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Disposed,
        }
    }

    /// Lowercase label used in health responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to release a resource.
#[derive(Error, Debug)]
#[error("failed to dispose {resource}: {reason}")]
pub struct DisposeError {
    /// Resource name
    pub resource: String,
    /// What went wrong
    pub reason: String,
}

impl DisposeError {
    /// Create a dispose error.
    pub fn new(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}

/// Lifecycle errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    /// The process is no longer running; new resources cannot be registered.
    #[error("lifecycle is {0}, cannot register resources")]
    NotRunning(LifecycleState),
}

/// A process-wide resource released on shutdown.
#[async_trait]
pub trait Disposable: Send + Sync {
    /// Resource name (for logs and metrics).
    fn name(&self) -> &str;

    /// Release the resource.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError`] if release fails. The manager logs it and
    /// continues with the remaining resources.
    async fn dispose(&self) -> Result<(), DisposeError>;
}

/// Default bound on a single resource's `dispose()`.
pub const DEFAULT_DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns process-wide singletons and releases them exactly once.
pub struct LifecycleManager {
    state: AtomicU8,
    draining: AtomicBool,
    resources: Mutex<Vec<Arc<dyn Disposable>>>,
    disposed: Notify,
    dispose_timeout: Duration,
}

impl LifecycleManager {
    /// Create a manager in the `Running` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Running as u8),
            draining: AtomicBool::new(false),
            resources: Mutex::new(Vec::new()),
            disposed: Notify::new(),
            dispose_timeout: DEFAULT_DISPOSE_TIMEOUT,
        }
    }

    /// Bound each resource's `dispose()` by `timeout`.
    #[must_use]
    pub const fn with_dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout = timeout;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether new deliveries should still be accepted.
    ///
    /// False once draining has begun, even though the state is still
    /// `Running` while in-flight requests finish.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running && !self.is_draining()
    }

    /// Stop accepting new deliveries ahead of shutdown.
    ///
    /// Called when a shutdown trigger fires, before the server drains.
    /// Returns `true` for the first call only.
    pub fn begin_draining(&self) -> bool {
        let first = !self.draining.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!("Draining, new deliveries are refused");
        }
        first
    }

    /// Whether [`begin_draining`](Self::begin_draining) has run.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Take ownership of a resource to release on shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] once shutdown has started.
    pub fn register(&self, resource: Arc<dyn Disposable>) -> Result<(), LifecycleError> {
        let mut resources = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so shutdown cannot drain the list in between.
        let state = self.state();
        if state != LifecycleState::Running {
            return Err(LifecycleError::NotRunning(state));
        }
        tracing::debug!(resource = resource.name(), "Resource registered");
        resources.push(resource);
        Ok(())
    }

    /// Number of resources awaiting disposal.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Release every registered resource, in reverse registration order.
    ///
    /// Only the first call does any work; later and concurrent calls return
    /// immediately with the state they observed. Disposal failures and
    /// disposals that exceed the dispose timeout are logged and do not stop
    /// the remaining releases.
    ///
    /// Dropping this future part-way leaves the remaining resources
    /// unreleased. Callers that need an overall deadline should spawn it and
    /// time out the wait, as [`shutdown_within`](Self::shutdown_within) does.
    pub async fn shutdown(&self) -> LifecycleState {
        if let Err(current) = self.state.compare_exchange(
            LifecycleState::Running as u8,
            LifecycleState::ShuttingDown as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            let current = LifecycleState::from_u8(current);
            tracing::debug!(state = %current, "Shutdown already requested");
            return current;
        }

        let resources = {
            let mut guard = self.resources.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        tracing::info!(resources = resources.len(), "Shutting down");

        for resource in resources.iter().rev() {
            match tokio::time::timeout(self.dispose_timeout, resource.dispose()).await {
                Ok(Ok(())) => tracing::info!(resource = resource.name(), "Resource disposed"),
                Ok(Err(error)) => {
                    tracing::error!(
                        resource = resource.name(),
                        error = %error,
                        "Resource disposal failed"
                    );
                    LifecycleMetrics::record_disposal_failure(resource.name());
                }
                Err(_) => {
                    tracing::error!(
                        resource = resource.name(),
                        timeout_ms = self.dispose_timeout.as_millis(),
                        "Resource disposal timed out"
                    );
                    LifecycleMetrics::record_disposal_failure(resource.name());
                }
            }
        }

        self.state.store(LifecycleState::Disposed as u8, Ordering::SeqCst);
        self.disposed.notify_waiters();
        tracing::info!("Shutdown complete");
        LifecycleState::Disposed
    }

    /// Run [`shutdown`](Self::shutdown) on its own task and wait at most
    /// `deadline` for it.
    ///
    /// Returns `None` if the deadline passed first. Disposal keeps running on
    /// the spawned task and still ends in `Disposed`.
    pub async fn shutdown_within(self: &Arc<Self>, deadline: Duration) -> Option<LifecycleState> {
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move { manager.shutdown().await });
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(state)) => Some(state),
            Ok(Err(error)) => {
                tracing::error!(error = %error, "Shutdown task failed");
                Some(self.state())
            }
            Err(_) => None,
        }
    }

    /// Wait until shutdown has finished.
    pub async fn wait_disposed(&self) {
        let notified = self.disposed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.state() == LifecycleState::Disposed {
            return;
        }
        notified.await;
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state())
            .field("draining", &self.is_draining())
            .field("registered", &self.registered())
            .field("dispose_timeout", &self.dispose_timeout)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counted {
        name: &'static str,
        disposals: AtomicUsize,
        fail: bool,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Counted {
        fn new(name: &'static str, fail: bool, order: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                disposals: AtomicUsize::new(0),
                fail,
                order: Arc::clone(order),
            })
        }
    }

    #[async_trait]
    impl Disposable for Counted {
        fn name(&self) -> &str {
            self.name
        }

        async fn dispose(&self) -> Result<(), DisposeError> {
            self.disposals.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.name);
            if self.fail {
                Err(DisposeError::new(self.name, "boom"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_disposes_in_reverse_order_despite_failures() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Counted::new("first", false, &order);
        let broken = Counted::new("broken", true, &order);
        let last = Counted::new("last", false, &order);

        let manager = LifecycleManager::new();
        manager.register(first.clone()).unwrap();
        manager.register(broken.clone()).unwrap();
        manager.register(last.clone()).unwrap();

        assert_eq!(manager.shutdown().await, LifecycleState::Disposed);
        assert_eq!(*order.lock().unwrap(), vec!["last", "broken", "first"]);
        assert_eq!(first.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let resource = Counted::new("client", false, &order);

        let manager = LifecycleManager::new();
        manager.register(resource.clone()).unwrap();

        manager.shutdown().await;
        assert_eq!(manager.shutdown().await, LifecycleState::Disposed);
        assert_eq!(resource.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_shutdown_disposes_once() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let resource = Counted::new("client", false, &order);

        let manager = Arc::new(LifecycleManager::new());
        manager.register(resource.clone()).unwrap();

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.shutdown().await })
            })
            .collect();
        for call in calls {
            call.await.unwrap();
        }

        manager.wait_disposed().await;
        assert_eq!(manager.state(), LifecycleState::Disposed);
        assert_eq!(resource.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_after_shutdown_is_refused() {
        let manager = LifecycleManager::new();
        manager.shutdown().await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let late = Counted::new("late", false, &order);
        assert_eq!(
            manager.register(late).unwrap_err(),
            LifecycleError::NotRunning(LifecycleState::Disposed)
        );
    }

    struct Stalling {
        disposals: AtomicUsize,
        delay: Duration,
    }

    impl Stalling {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                disposals: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl Disposable for Stalling {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn dispose(&self) -> Result<(), DisposeError> {
            tokio::time::sleep(self.delay).await;
            self.disposals.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stalled_disposal_is_bounded() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let client = Counted::new("client", false, &order);
        let stalling = Stalling::new(Duration::from_secs(30));

        let manager = LifecycleManager::new().with_dispose_timeout(Duration::from_millis(50));
        manager.register(client.clone()).unwrap();
        manager.register(stalling.clone()).unwrap();

        let state = tokio::time::timeout(Duration::from_secs(5), manager.shutdown()).await;

        assert_eq!(state.unwrap(), LifecycleState::Disposed);
        assert_eq!(client.disposals.load(Ordering::SeqCst), 1);
        assert_eq!(stalling.disposals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missed_deadline_still_disposes_everything() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let client = Counted::new("client", false, &order);
        let slow = Stalling::new(Duration::from_millis(300));

        let manager = Arc::new(LifecycleManager::new());
        manager.register(client.clone()).unwrap();
        manager.register(slow.clone()).unwrap();

        let result = manager.shutdown_within(Duration::from_millis(50)).await;
        assert_eq!(result, None);
        assert_eq!(manager.state(), LifecycleState::ShuttingDown);

        tokio::time::timeout(Duration::from_secs(5), manager.wait_disposed())
            .await
            .unwrap();
        assert_eq!(manager.state(), LifecycleState::Disposed);
        assert_eq!(slow.disposals.load(Ordering::SeqCst), 1);
        assert_eq!(client.disposals.load(Ordering::SeqCst), 1);
        assert_eq!(manager.shutdown().await, LifecycleState::Disposed);
    }

    #[tokio::test]
    async fn test_shutdown_within_deadline() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let client = Counted::new("client", false, &order);

        let manager = Arc::new(LifecycleManager::new());
        manager.register(client.clone()).unwrap();

        let result = manager.shutdown_within(Duration::from_secs(5)).await;
        assert_eq!(result, Some(LifecycleState::Disposed));
        assert_eq!(client.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_draining_refuses_before_shutdown() {
        let manager = LifecycleManager::new();
        assert!(manager.is_running());

        assert!(manager.begin_draining());
        assert!(!manager.begin_draining());

        assert!(!manager.is_running());
        assert_eq!(manager.state(), LifecycleState::Running);
        assert_eq!(manager.shutdown().await, LifecycleState::Disposed);
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(LifecycleState::Running.to_string(), "running");
        assert_eq!(LifecycleState::ShuttingDown.as_str(), "shutting_down");
    }
}
