//! Sliding-window flow control policy.
//!
//! The policy decides whether a single-event delivery may proceed, given the
//! deployment's delivery-rate configuration and the recent admission history.
//!
//! # Algorithm
//!
//! 1. Discard samples older than `window_duration` (sliding window, not a
//!    fixed bucket reset)
//! 2. Count the remaining admitted windows
//! 3. If the count is below `window_count`, proceed
//! 4. Otherwise advise the caller to retry once the oldest counted sample
//!    expires (never less than [`MIN_RETRY_AFTER_MS`])
//!
//! The policy itself never blocks or sleeps; it only advises. Recording the
//! admitted sample atomically with the check is the job of the runtime's
//! flow controller.
//!
//! # Example
//!
//! ```
//! use notiflow_core::flow_control::{evaluate, FlowControlConfig, WindowStats};
//! use notiflow_core::{DateTime, Utc};
//! use std::time::Duration;
//!
//! let config = FlowControlConfig::builder()
//!     .window_count(1)
//!     .window_duration(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//!
//! let now = DateTime::<Utc>::UNIX_EPOCH;
//! let mut stats = WindowStats::new();
//! assert!(evaluate(&config, &stats, now).proceed);
//!
//! stats.record(now);
//! let verdict = evaluate(&config, &stats, now);
//! assert!(!verdict.proceed);
//! assert_eq!(verdict.retry_after_ms, Some(60_000));
//! ```

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Smallest retry delay ever advised, to avoid busy-retry loops.
pub const MIN_RETRY_AFTER_MS: u64 = 1;

/// Flow control hint type returned to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlMode {
    /// Accept this call; the sender paces the next call from the response.
    #[default]
    Next,
    /// Accept this call and keep sending at the current pace.
    Accept,
    /// Retry this call later.
    Retry,
}

impl FlowControlMode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Accept => "accept",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for FlowControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowControlMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "next" => Ok(Self::Next),
            "accept" => Ok(Self::Accept),
            "retry" => Ok(Self::Retry),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// Delivery-rate configuration, validated at construction.
///
/// At most `window_count` windows are admitted per trailing
/// `window_duration`, each window carrying up to `max_batch_size` records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControlConfig {
    mode: FlowControlMode,
    max_batch_size: u32,
    window_count: u32,
    window_duration: Duration,
}

impl FlowControlConfig {
    /// Default `maxBatchSize`.
    pub const DEFAULT_MAX_BATCH_SIZE: u32 = 30;
    /// Default `windowCount`.
    pub const DEFAULT_WINDOW_COUNT: u32 = 5;
    /// Default `windowDurationMs`.
    pub const DEFAULT_WINDOW_DURATION_MS: u64 = 60_000;

    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> FlowControlConfigBuilder {
        FlowControlConfigBuilder {
            mode: FlowControlMode::Next,
            max_batch_size: Self::DEFAULT_MAX_BATCH_SIZE,
            window_count: Self::DEFAULT_WINDOW_COUNT,
            window_duration: Duration::from_millis(Self::DEFAULT_WINDOW_DURATION_MS),
        }
    }

    /// Hint type returned on admitted calls.
    #[must_use]
    pub const fn mode(&self) -> FlowControlMode {
        self.mode
    }

    /// Maximum records per window.
    #[must_use]
    pub const fn max_batch_size(&self) -> u32 {
        self.max_batch_size
    }

    /// Admitted windows allowed per trailing window duration.
    #[must_use]
    pub const fn window_count(&self) -> u32 {
        self.window_count
    }

    /// Trailing window duration.
    #[must_use]
    pub const fn window_duration(&self) -> Duration {
        self.window_duration
    }

    /// Trailing window duration in milliseconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Validated windows are far below u64::MAX ms
    pub const fn window_duration_ms(&self) -> u64 {
        self.window_duration.as_millis() as u64
    }

    /// Hint advertised to the sender on an admitted call.
    #[must_use]
    pub const fn hint(&self) -> FlowControlHint {
        FlowControlHint {
            mode: self.mode,
            size: self.max_batch_size,
            window_count: self.window_count,
            in_time: self.window_duration_ms(),
        }
    }

    /// Hint advertised to the sender when a call is rate limited.
    #[must_use]
    pub const fn retry_hint(&self) -> FlowControlHint {
        FlowControlHint {
            mode: FlowControlMode::Retry,
            ..self.hint()
        }
    }
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            mode: FlowControlMode::Next,
            max_batch_size: Self::DEFAULT_MAX_BATCH_SIZE,
            window_count: Self::DEFAULT_WINDOW_COUNT,
            window_duration: Duration::from_millis(Self::DEFAULT_WINDOW_DURATION_MS),
        }
    }
}

/// Builder for [`FlowControlConfig`].
#[derive(Debug, Clone)]
pub struct FlowControlConfigBuilder {
    mode: FlowControlMode,
    max_batch_size: u32,
    window_count: u32,
    window_duration: Duration,
}

impl FlowControlConfigBuilder {
    /// Set the hint type returned on admitted calls.
    #[must_use]
    pub const fn mode(mut self, mode: FlowControlMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the maximum records per window.
    #[must_use]
    pub const fn max_batch_size(mut self, size: u32) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set the number of admitted windows per window duration.
    #[must_use]
    pub const fn window_count(mut self, count: u32) -> Self {
        self.window_count = count;
        self
    }

    /// Set the trailing window duration.
    #[must_use]
    pub const fn window_duration(mut self, duration: Duration) -> Self {
        self.window_duration = duration;
        self
    }

    /// Set the trailing window duration in milliseconds.
    #[must_use]
    pub const fn window_duration_ms(self, ms: u64) -> Self {
        self.window_duration(Duration::from_millis(ms))
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the window duration is shorter than one
    /// millisecond, or if the window count or batch size is zero.
    pub const fn build(self) -> Result<FlowControlConfig, ConfigError> {
        if self.window_duration.as_millis() == 0 {
            return Err(ConfigError::ZeroWindowDuration);
        }
        if self.window_count == 0 {
            return Err(ConfigError::ZeroWindowCount);
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(FlowControlConfig {
            mode: self.mode,
            max_batch_size: self.max_batch_size,
            window_count: self.window_count,
            window_duration: self.window_duration,
        })
    }
}

/// Flow control hint serialized into responses for the upstream sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowControlHint {
    /// Hint type.
    #[serde(rename = "type")]
    pub mode: FlowControlMode,
    /// Maximum records per window.
    pub size: u32,
    /// Admitted windows per `in_time`.
    #[serde(rename = "in")]
    pub window_count: u32,
    /// Window duration in milliseconds.
    pub in_time: u64,
}

/// Admission decision for one single-event delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionVerdict {
    /// Whether the delivery may proceed.
    pub proceed: bool,
    /// Advised delay before retrying, present only when `proceed` is false.
    pub retry_after_ms: Option<u64>,
}

impl AdmissionVerdict {
    /// Verdict allowing the delivery.
    #[must_use]
    pub const fn proceed() -> Self {
        Self {
            proceed: true,
            retry_after_ms: None,
        }
    }

    /// Verdict asking the sender to retry after `ms` (floored at 1 ms).
    #[must_use]
    pub const fn retry_after(ms: u64) -> Self {
        let ms = if ms < MIN_RETRY_AFTER_MS {
            MIN_RETRY_AFTER_MS
        } else {
            ms
        };
        Self {
            proceed: false,
            retry_after_ms: Some(ms),
        }
    }
}

/// Timestamps of recently admitted windows, oldest first.
#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    samples: VecDeque<DateTime<Utc>>,
}

impl WindowStats {
    /// Create empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop samples whose age exceeds `window` at `now`.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(&oldest) = self.samples.front() {
            if age_ms(oldest, now) > window.as_millis() {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record an admitted window at `at`.
    ///
    /// Samples stay ordered oldest first even if `at` is earlier than the
    /// newest sample already held.
    pub fn record(&mut self, at: DateTime<Utc>) {
        let position = self.samples.partition_point(|sample| *sample <= at);
        self.samples.insert(position, at);
    }

    /// Number of samples held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn within(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let window_ms = window.as_millis();
        self.samples
            .iter()
            .copied()
            .filter(move |sample| age_ms(*sample, now) <= window_ms)
    }
}

/// Milliseconds elapsed from `sample` to `now`. Future samples count as age 0.
fn age_ms(sample: DateTime<Utc>, now: DateTime<Utc>) -> u128 {
    u128::try_from((now - sample).num_milliseconds()).unwrap_or(0)
}

/// Evaluate the admission policy.
///
/// Only samples whose age is at most the configured window duration are
/// counted, regardless of whether `recent` has been pruned.
#[must_use]
pub fn evaluate(
    config: &FlowControlConfig,
    recent: &WindowStats,
    now: DateTime<Utc>,
) -> AdmissionVerdict {
    let window = config.window_duration();
    let mut counted = recent.within(now, window);

    let Some(oldest) = counted.next() else {
        return AdmissionVerdict::proceed();
    };
    let count = 1 + counted.count();

    if count < config.window_count() as usize {
        return AdmissionVerdict::proceed();
    }

    let elapsed = age_ms(oldest, now);
    let remaining = window.as_millis().saturating_sub(elapsed);
    AdmissionVerdict::retry_after(u64::try_from(remaining).unwrap_or(u64::MAX))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::milliseconds(ms)
    }

    fn config(count: u32, window_ms: u64) -> FlowControlConfig {
        FlowControlConfig::builder()
            .window_count(count)
            .window_duration_ms(window_ms)
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = FlowControlConfig::default();
        assert_eq!(config.mode(), FlowControlMode::Next);
        assert_eq!(config.max_batch_size(), 30);
        assert_eq!(config.window_count(), 5);
        assert_eq!(config.window_duration_ms(), 60_000);
        assert_eq!(FlowControlConfig::builder().build().unwrap(), config);
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        assert_eq!(
            FlowControlConfig::builder().window_duration_ms(0).build(),
            Err(ConfigError::ZeroWindowDuration)
        );
        assert_eq!(
            FlowControlConfig::builder()
                .window_duration(Duration::from_micros(500))
                .build(),
            Err(ConfigError::ZeroWindowDuration)
        );
        assert_eq!(
            FlowControlConfig::builder().window_count(0).build(),
            Err(ConfigError::ZeroWindowCount)
        );
        assert_eq!(
            FlowControlConfig::builder().max_batch_size(0).build(),
            Err(ConfigError::ZeroBatchSize)
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("next".parse(), Ok(FlowControlMode::Next));
        assert_eq!(" Retry ".parse(), Ok(FlowControlMode::Retry));
        assert_eq!("accept".parse(), Ok(FlowControlMode::Accept));
        assert_eq!(
            "later".parse::<FlowControlMode>(),
            Err(ConfigError::InvalidMode("later".to_string()))
        );
    }

    #[test]
    fn test_proceeds_below_cap() {
        let config = config(2, 1_000);
        let mut stats = WindowStats::new();
        stats.record(at(0));
        assert_eq!(evaluate(&config, &stats, at(10)), AdmissionVerdict::proceed());
    }

    #[test]
    fn test_retry_after_is_time_until_oldest_expires() {
        let config = FlowControlConfig::default();
        let mut stats = WindowStats::new();
        for _ in 0..5 {
            stats.record(at(0));
        }

        let verdict = evaluate(&config, &stats, at(100));
        assert!(!verdict.proceed);
        assert_eq!(verdict.retry_after_ms, Some(59_900));
    }

    #[test]
    fn test_samples_expire_after_window() {
        let config = config(1, 1_000);
        let mut stats = WindowStats::new();
        stats.record(at(0));

        assert!(!evaluate(&config, &stats, at(999)).proceed);
        assert!(evaluate(&config, &stats, at(1_001)).proceed);
    }

    #[test]
    fn test_sample_at_window_edge_still_counts_with_min_backoff() {
        let config = config(1, 1_000);
        let mut stats = WindowStats::new();
        stats.record(at(0));

        let verdict = evaluate(&config, &stats, at(1_000));
        assert_eq!(verdict, AdmissionVerdict::retry_after(MIN_RETRY_AFTER_MS));
    }

    #[test]
    fn test_late_sample_keeps_oldest_first() {
        let config = FlowControlConfig::builder()
            .window_count(2)
            .window_duration_ms(1_000)
            .build()
            .unwrap();
        let mut stats = WindowStats::new();
        stats.record(at(300));
        stats.record(at(100));

        // The sample at 100 is the true oldest and expires first.
        assert_eq!(evaluate(&config, &stats, at(400)).retry_after_ms, Some(700));
        stats.prune(at(1_101), config.window_duration());
        assert_eq!(stats.len(), 1);
    }

    #[test]
    fn test_prune_discards_only_expired() {
        let mut stats = WindowStats::new();
        stats.record(at(0));
        stats.record(at(500));
        stats.record(at(900));

        stats.prune(at(1_400), Duration::from_millis(1_000));
        assert_eq!(stats.len(), 2);

        stats.prune(at(10_000), Duration::from_millis(1_000));
        assert!(stats.is_empty());
    }

    #[test]
    fn test_hints() {
        let config = FlowControlConfig::default();
        let hint = serde_json::to_value(config.hint()).unwrap();
        assert_eq!(
            hint,
            serde_json::json!({"type": "next", "size": 30, "in": 5, "in_time": 60000})
        );
        assert_eq!(config.retry_hint().mode, FlowControlMode::Retry);
    }

    #[test]
    fn test_retry_after_floor() {
        assert_eq!(AdmissionVerdict::retry_after(0).retry_after_ms, Some(1));
    }
}
