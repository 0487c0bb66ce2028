//! Sliding-window admission control shared across requests.
//!
//! [`FlowController`] wraps the pure policy from
//! [`notiflow_core::flow_control`] with the only lock in the dispatch path.
//! Pruning, evaluation and recording of an admitted sample happen inside a
//! single critical section, so two concurrent requests can never both observe
//! room for the same slot.
//!
//! The lock is a synchronous mutex and is never held across an `.await`.

use crate::metrics::FlowControlMetrics;
use notiflow_core::environment::{Clock, SystemClock};
use notiflow_core::flow_control::{evaluate, AdmissionVerdict, FlowControlConfig, WindowStats};
use std::sync::{Arc, Mutex, PoisonError};

/// Process-wide admission controller for single-event deliveries.
///
/// # Example
///
/// ```
/// use notiflow_core::FlowControlConfig;
/// use notiflow_runtime::FlowController;
///
/// let controller = FlowController::with_system_clock(FlowControlConfig::default());
/// for _ in 0..5 {
///     assert!(controller.admit().proceed);
/// }
/// assert!(!controller.admit().proceed);
/// ```
pub struct FlowController {
    config: FlowControlConfig,
    clock: Arc<dyn Clock>,
    stats: Mutex<WindowStats>,
}

impl FlowController {
    /// Create a controller with an injected clock.
    #[must_use]
    pub fn new(config: FlowControlConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            stats: Mutex::new(WindowStats::new()),
        }
    }

    /// Create a controller driven by the system clock.
    #[must_use]
    pub fn with_system_clock(config: FlowControlConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &FlowControlConfig {
        &self.config
    }

    /// Evaluate admission and, if admitted, record a window sample.
    ///
    /// Never fails and never blocks beyond the short critical section.
    pub fn admit(&self) -> AdmissionVerdict {
        let verdict = {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            // Read under the lock so samples are recorded in clock order.
            let now = self.clock.now();
            stats.prune(now, self.config.window_duration());
            let verdict = evaluate(&self.config, &stats, now);
            if verdict.proceed {
                stats.record(now);
            }
            verdict
        };

        match verdict.retry_after_ms {
            None => FlowControlMetrics::record_admitted(),
            Some(retry_after_ms) => {
                tracing::debug!(retry_after_ms, "Flow control window full");
                FlowControlMetrics::record_rate_limited();
            }
        }

        verdict
    }

    /// Evaluate admission without recording anything.
    #[must_use]
    pub fn peek(&self) -> AdmissionVerdict {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        evaluate(&self.config, &stats, now)
    }

    /// Number of admitted windows still inside the trailing window.
    #[must_use]
    pub fn admitted_in_window(&self) -> usize {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        stats.prune(now, self.config.window_duration());
        stats.len()
    }
}

impl std::fmt::Debug for FlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};

    struct StepClock(Mutex<DateTime<Utc>>);

    impl StepClock {
        fn advance(&self, ms: i64) {
            let mut now = self.0.lock().unwrap();
            *now += TimeDelta::milliseconds(ms);
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn controller(count: u32, window_ms: u64) -> (FlowController, Arc<StepClock>) {
        let clock = Arc::new(StepClock(Mutex::new(DateTime::<Utc>::UNIX_EPOCH)));
        let config = FlowControlConfig::builder()
            .window_count(count)
            .window_duration_ms(window_ms)
            .build()
            .unwrap();
        (FlowController::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_rejection_does_not_consume_a_window() {
        let (controller, _clock) = controller(1, 1_000);
        assert!(controller.admit().proceed);
        assert!(!controller.admit().proceed);
        assert!(!controller.admit().proceed);
        assert_eq!(controller.admitted_in_window(), 1);
    }

    #[test]
    fn test_window_slides() {
        let (controller, clock) = controller(2, 1_000);
        assert!(controller.admit().proceed);
        clock.advance(600);
        assert!(controller.admit().proceed);
        assert!(!controller.admit().proceed);

        // First sample expires, second is still counted.
        clock.advance(401);
        assert!(controller.admit().proceed);
        let verdict = controller.admit();
        assert!(!verdict.proceed);
        assert_eq!(verdict.retry_after_ms, Some(599));
    }

    #[test]
    fn test_peek_does_not_record() {
        let (controller, _clock) = controller(1, 1_000);
        assert!(controller.peek().proceed);
        assert!(controller.peek().proceed);
        assert_eq!(controller.admitted_in_window(), 0);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_cap() {
        let (controller, _clock) = controller(5, 60_000);
        let controller = Arc::new(controller);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || controller.admit().proceed)
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|proceed| *proceed)
            .count();

        assert_eq!(admitted, 5);
    }

    /// Counts clock reads made while the window lock is free.
    #[derive(Default)]
    struct LockCheckingClock {
        controller: std::sync::OnceLock<std::sync::Weak<FlowController>>,
        unlocked_reads: std::sync::atomic::AtomicUsize,
    }

    impl Clock for LockCheckingClock {
        fn now(&self) -> DateTime<Utc> {
            if let Some(controller) = self.controller.get().and_then(std::sync::Weak::upgrade) {
                if controller.stats.try_lock().is_ok() {
                    self.unlocked_reads
                        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            }
            DateTime::<Utc>::UNIX_EPOCH
        }
    }

    #[test]
    fn test_clock_is_read_inside_the_critical_section() {
        let clock = Arc::new(LockCheckingClock::default());
        let controller = Arc::new(FlowController::new(
            FlowControlConfig::default(),
            clock.clone(),
        ));
        clock.controller.set(Arc::downgrade(&controller)).unwrap();

        controller.admit();
        controller.peek();
        controller.admitted_in_window();

        assert_eq!(
            clock.unlocked_reads.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }
}
