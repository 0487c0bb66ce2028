//! Application wiring and graceful shutdown.
//!
//! [`Application::build`] creates every process-wide singleton once:
//!
//! 1. **Metrics**: the global Prometheus recorder
//! 2. **Shared client**: one [`HttpForwarder`], owned by the lifecycle manager
//! 3. **Scopes**: a provider holding only a weak reference to the client
//! 4. **Router**: one [`ForwardingHandler`] per default topic behind a shared
//!    flow controller
//! 5. **Listener**: bound before `run()` so callers can read the address
//!
//! # Graceful Shutdown
//!
//! Either trigger ends the server: SIGINT/SIGTERM, or [`CloseHandle::close`]
//! (the programmatic application-close event). The lifecycle starts
//! draining, so deliveries on still-open connections and `/health/ready` get
//! 503. The server stops accepting, drains in-flight requests, then [`LifecycleManager::shutdown`] releases
//! the singletons within `SHUTDOWN_TIMEOUT`. A second trigger is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! let app = Application::build(Config::from_env()?).await?;
//! app.run().await?;
//! ```

use crate::config::Config;
use crate::forwarder::{ForwardingHandler, HttpForwarder, DEFAULT_TOPICS};
use anyhow::Context;
use notiflow_runtime::metrics::MetricsRecorder;
use notiflow_runtime::{
    Disposable, FlowController, Handler, LifecycleManager, LifecycleState, NotificationRouter,
    ScopeProvider, SharedClient,
};
use notiflow_web::{build_router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Fires the application-close event.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle {
    notify: Arc<Notify>,
}

impl CloseHandle {
    /// Ask the running application to shut down.
    ///
    /// Safe to call before `run()` starts waiting; the request is kept.
    pub fn close(&self) {
        self.notify.notify_one();
    }

    async fn closed(&self) {
        self.notify.notified().await;
    }
}

/// A fully wired, bound, not yet serving application.
pub struct Application {
    listener: TcpListener,
    app: axum::Router,
    lifecycle: Arc<LifecycleManager>,
    close: CloseHandle,
    shutdown_timeout: Duration,
}

impl Application {
    /// Wire every component and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns error if the metrics recorder, the HTTP client, or the
    /// listener cannot be set up.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut metrics = MetricsRecorder::new();
        metrics
            .install()
            .context("failed to install metrics recorder")?;

        let lifecycle = Arc::new(
            LifecycleManager::new().with_dispose_timeout(config.server.shutdown_timeout()),
        );

        let forwarder = Arc::new(
            HttpForwarder::new(&config.downstream).context("failed to build downstream client")?,
        );
        lifecycle
            .register(forwarder.clone() as Arc<dyn Disposable>)
            .context("failed to register downstream client")?;
        let shared: Arc<dyn SharedClient> = forwarder;
        let scopes = ScopeProvider::new(config.settings.clone()).with_client(&shared);
        // The lifecycle manager is now the only strong owner.
        drop(shared);

        let router = DEFAULT_TOPICS
            .iter()
            .fold(
                NotificationRouter::builder(FlowController::with_system_clock(
                    config.flow_control.clone(),
                )),
                |builder, topic| {
                    builder.route(
                        *topic,
                        Arc::new(ForwardingHandler::new(*topic)) as Arc<dyn Handler>,
                    )
                },
            )
            .build();

        let state = AppState::new(Arc::new(router), scopes, lifecycle.clone())
            .with_metrics(Arc::new(metrics));
        let app = build_router(state);

        let address = config.server.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;

        info!(
            address = %address,
            max_batch_size = config.flow_control.max_batch_size(),
            window_count = config.flow_control.window_count(),
            window_duration_ms = config.flow_control.window_duration_ms(),
            mode = %config.flow_control.mode(),
            "Application built"
        );

        Ok(Self {
            listener,
            app,
            lifecycle,
            close: CloseHandle::default(),
            shutdown_timeout: config.server.shutdown_timeout(),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that triggers the application-close event.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    /// Lifecycle manager owning the process-wide singletons.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<LifecycleManager> {
        self.lifecycle.clone()
    }

    /// Serve until a shutdown trigger fires, then release the singletons.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(address = ?self.listener.local_addr().ok(), "HTTP server listening for requests");

        let close = self.close.clone();
        let lifecycle = self.lifecycle.clone();
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown_signal() => {}
                    () = close.closed() => {
                        info!("Received application close");
                    }
                }
                // Requests still arriving on open connections get 503.
                lifecycle.begin_draining();
            })
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped, releasing shared resources");

        match self.lifecycle.shutdown_within(self.shutdown_timeout).await {
            Some(LifecycleState::Disposed) => info!("Graceful shutdown complete"),
            Some(state) => info!(state = %state, "Shutdown already in progress"),
            None => warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Shutdown timed out before all resources were released"
            ),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("address", &self.listener.local_addr().ok())
            .field("lifecycle", &self.lifecycle)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
