//! # Notiflow Server
//!
//! Process wiring for the notification dispatch service: configuration from
//! the environment, the shared downstream client, the default forwarding
//! handler, and graceful shutdown.

pub mod app;
pub mod config;
pub mod forwarder;

pub use app::{Application, CloseHandle};
pub use config::Config;
pub use forwarder::{ForwardingHandler, HttpForwarder, DEFAULT_TOPICS};
