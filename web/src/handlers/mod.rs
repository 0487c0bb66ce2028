//! HTTP request handlers.

pub mod health;
pub mod metrics;
pub mod notify;

pub use health::{health_check, readiness};
pub use notify::{batch, notify};
