//! # Notiflow Core
//!
//! Core types and pure policies for flow-controlled notification dispatch.
//!
//! This crate is the functional core of the workspace: everything in here is
//! deterministic and free of I/O, so it can be tested at memory speed.
//!
//! ## Core Concepts
//!
//! - **Record**: an opaque update payload (entity id + attribute deltas)
//! - **DeliveryRequest**: one inbound call carrying a topic and its records
//! - **Grouping**: per-entity merge of attribute deltas before dispatch
//! - **Flow control**: sliding-window admission policy producing an
//!   [`AdmissionVerdict`](flow_control::AdmissionVerdict)
//! - **Environment**: injected dependencies (the [`Clock`](environment::Clock))
//!
//! ## Example
//!
//! ```
//! use notiflow_core::flow_control::{evaluate, FlowControlConfig, WindowStats};
//! use notiflow_core::environment::{Clock, SystemClock};
//!
//! let config = FlowControlConfig::default();
//! let stats = WindowStats::new();
//! let verdict = evaluate(&config, &stats, SystemClock.now());
//! assert!(verdict.proceed);
//! ```

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod delivery;
pub mod error;
pub mod flow_control;
pub mod record;

pub use delivery::{DeliveryPath, DeliveryRequest};
pub use error::ConfigError;
pub use flow_control::{AdmissionVerdict, FlowControlConfig, FlowControlHint, FlowControlMode};
pub use record::{group, EntityId, Record};

/// Environment module - Dependency injection traits
///
/// All time-dependent behaviour goes through [`Clock`](environment::Clock) so
/// that flow-control windows can be driven deterministically in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use notiflow_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
