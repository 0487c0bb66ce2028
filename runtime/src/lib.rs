//! # Notiflow Runtime
//!
//! Runtime for flow-controlled notification dispatch.
//!
//! This crate is the imperative shell around [`notiflow_core`]: it owns the
//! shared, mutable state (admission windows, the singleton registry) and
//! executes handlers.
//!
//! ## Core Components
//!
//! - **[`FlowController`]**: atomic check-and-record over the sliding window
//! - **[`ScopeProvider`]**: per-request [`RequestScope`] creation and release
//! - **[`NotificationRouter`]**: topic → handler dispatch
//! - **[`LifecycleManager`]**: idempotent shutdown of process-wide singletons
//!
//! ## Example
//!
//! ```ignore
//! use notiflow_runtime::{FlowController, NotificationRouter, ScopeProvider};
//!
//! let router = NotificationRouter::builder(FlowController::with_system_clock(config))
//!     .route("user:update", Arc::new(MyHandler))
//!     .build();
//!
//! let scope = provider.open_scope(request.settings.as_ref());
//! let outcome = router.dispatch(scope, request).await;
//! ```

/// Sliding-window admission control shared across requests
pub mod flow_control;

/// Handler contract invoked by the router
pub mod handler;

/// Lifecycle state machine for process-wide singletons
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Topic routing and dispatch
pub mod router;

/// Request-scoped resources
pub mod scope;

pub use flow_control::FlowController;
pub use handler::{Handler, HandlerError, HandlerOutcome};
pub use lifecycle::{Disposable, DisposeError, LifecycleError, LifecycleManager, LifecycleState};
pub use router::{DispatchOutcome, NotificationRouter, RouterBuilder};
pub use scope::{ClientError, RequestScope, ScopeProvider, Settings, SharedClient};
