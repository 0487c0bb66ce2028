//! Configuration management for the notiflow server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A variable that is present but unparsable is an error, never silently
//! replaced by its default.

use notiflow_core::{ConfigError, FlowControlConfig, FlowControlMode};
use notiflow_runtime::Settings;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Delivery-rate configuration
    pub flow_control: FlowControlConfig,
    /// Downstream processing tier
    pub downstream: DownstreamConfig,
    /// Default settings for every request scope
    pub settings: Settings,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl ServerConfig {
    /// `host:port` bind address.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Shutdown timeout as a duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

/// Downstream configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamConfig {
    /// Base URL records are forwarded to; `None` means log only
    pub url: Option<String>,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl DownstreamConfig {
    /// Per-request timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is unparsable or the flow
    /// control parameters are invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup` (the environment, or a map in tests).
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let flow_control = FlowControlConfig::builder()
            .max_batch_size(parse_or(
                &lookup,
                "FLOW_CONTROL_SIZE",
                FlowControlConfig::DEFAULT_MAX_BATCH_SIZE,
            )?)
            .window_count(parse_or(
                &lookup,
                "FLOW_CONTROL_IN",
                FlowControlConfig::DEFAULT_WINDOW_COUNT,
            )?)
            .window_duration_ms(parse_or(
                &lookup,
                "FLOW_CONTROL_IN_TIME",
                FlowControlConfig::DEFAULT_WINDOW_DURATION_MS,
            )?)
            .mode(match lookup("FLOW_CONTROL_TYPE") {
                Some(raw) => raw.parse()?,
                None => FlowControlMode::default(),
            })
            .build()?;

        Ok(Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "PORT", 8080)?,
                shutdown_timeout: parse_or(&lookup, "SHUTDOWN_TIMEOUT", 30)?,
            },
            flow_control,
            downstream: DownstreamConfig {
                url: lookup("DOWNSTREAM_URL").filter(|url| !url.trim().is_empty()),
                timeout_ms: parse_or(&lookup, "DOWNSTREAM_TIMEOUT_MS", 10_000)?,
            },
            settings: parse_settings(lookup("CONNECTOR_SETTINGS"))?,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid_value(key, raw)),
    }
}

fn parse_settings(raw: Option<String>) -> Result<Settings, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Settings::new());
    };
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Object(settings)) => Ok(settings),
        _ => Err(ConfigError::invalid_value("CONNECTOR_SETTINGS", raw)),
    }
}
