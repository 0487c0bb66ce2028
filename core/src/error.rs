//! Configuration errors.
//!
//! These are the only errors the core raises. They are fatal at startup:
//! evaluation of a validated configuration never fails.

use thiserror::Error;

/// Invalid deployment configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `windowDurationMs` was zero.
    #[error("flow control window duration must be greater than zero")]
    ZeroWindowDuration,

    /// `windowCount` was zero, which would reject every call.
    #[error("flow control window count must be greater than zero")]
    ZeroWindowCount,

    /// `maxBatchSize` was zero.
    #[error("flow control batch size must be greater than zero")]
    ZeroBatchSize,

    /// Flow control mode was not one of `next`, `accept`, `retry`.
    #[error("unknown flow control mode: {0}")]
    InvalidMode(String),

    /// An environment value was present but could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Raw value as read
        value: String,
    },
}

impl ConfigError {
    /// Build an [`ConfigError::InvalidValue`] for `key`.
    #[must_use]
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}
