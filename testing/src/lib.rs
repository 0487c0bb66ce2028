//! # Notiflow Testing
//!
//! Testing utilities and helpers for Notiflow.
//!
//! This crate provides:
//! - Mock implementations of environment traits (clocks)
//! - Scriptable handlers that record every invocation
//! - A mock shared client that tracks forwards and disposals
//! - Property-based testing strategies for records
//!
//! ## Example
//!
//! ```ignore
//! use notiflow_testing::{ManualClock, RecordingHandler};
//!
//! #[tokio::test]
//! async fn test_rate_limit() {
//!     let clock = Arc::new(ManualClock::epoch());
//!     let handler = Arc::new(RecordingHandler::accepting());
//!     let router = NotificationRouter::builder(FlowController::new(config, clock.clone()))
//!         .route("user:update", handler.clone())
//!         .build();
//!
//!     // ...dispatch...
//!     clock.advance_ms(100);
//!     assert_eq!(handler.invocations().len(), 5);
//! }
//! ```

use chrono::{DateTime, Utc};
use notiflow_core::environment::Clock;

mod client;
mod handlers;

pub use client::{Forwarded, MockSharedClient};
pub use handlers::{Behavior, Invocation, RecordingHandler};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::TimeDelta;
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use notiflow_testing::mocks::FixedClock;
    /// use notiflow_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    ///
    /// Drives sliding windows step by step.
    ///
    /// ```
    /// use notiflow_testing::mocks::ManualClock;
    /// use notiflow_core::environment::Clock;
    ///
    /// let clock = ManualClock::epoch();
    /// let start = clock.now();
    /// clock.advance_ms(100);
    /// assert_eq!((clock.now() - start).num_milliseconds(), 100);
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(time),
            }
        }

        /// Start at the Unix epoch.
        #[must_use]
        pub const fn epoch() -> Self {
            Self::new(DateTime::<Utc>::UNIX_EPOCH)
        }

        /// Move forward by `ms` milliseconds.
        pub fn advance_ms(&self, ms: i64) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            *now += TimeDelta::milliseconds(ms);
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use notiflow_core::Record;

    /// Install a test tracing subscriber honouring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// `count` records with distinct ids `e0..eN`, each carrying `seq`.
    #[must_use]
    pub fn distinct_records(count: usize) -> Vec<Record> {
        (0..count)
            .map(|i| Record::new(format!("e{i}")).with_trait("seq", i))
            .collect()
    }
}

/// Property-based testing strategies.
pub mod properties {
    use notiflow_core::Record;
    use proptest::prelude::*;

    /// Records drawn from a small id space (so ids repeat) with a few trait
    /// keys, occasionally anonymous.
    pub fn record_strategy() -> impl Strategy<Value = Record> {
        (
            prop::option::weighted(0.85, prop::sample::select(vec!["a", "b", "c", "d"])),
            prop::collection::btree_map(
                prop::sample::select(vec!["name", "plan", "score", "region"]),
                any::<i32>(),
                0..4,
            ),
        )
            .prop_map(|(id, traits)| {
                let base = id.map_or_else(Record::anonymous, |id| Record::new(id));
                traits
                    .into_iter()
                    .fold(base, |record, (key, value)| record.with_trait(key, value))
            })
    }

    /// Ordered record sequences of up to `max` elements.
    pub fn records_strategy(max: usize) -> impl Strategy<Value = Vec<Record>> {
        prop::collection::vec(record_strategy(), 0..=max)
    }
}

pub use mocks::{FixedClock, ManualClock, test_clock};
