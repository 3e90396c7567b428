//! Infrastructure layer: stores, lifecycle service, outbox relay, provisioning
//! workflow, Postgres backends and configuration.

pub mod config;
pub mod outbox;
pub mod projects;
pub mod relationships;
pub mod retry;
pub mod workers;
pub mod workflow;

pub use config::{AdminConfig, ConfigError};
pub use retry::RetryPolicy;
