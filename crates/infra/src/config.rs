//! Process configuration from environment variables.

use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::workflow::NotificationMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminConfig {
    /// `None` runs every backend in memory.
    pub database_url: Option<String>,
    pub workflow_retry: RetryPolicy,
    pub notification_mode: NotificationMode,
    pub outbox_poll_interval: Duration,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            workflow_retry: RetryPolicy::default(),
            notification_mode: NotificationMode::BestEffort,
            outbox_poll_interval: Duration::from_millis(100),
        }
    }
}

impl AdminConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let default_retry = &defaults.workflow_retry;

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let max_attempts: u32 = parse(&lookup, "WORKFLOW_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(invalid("WORKFLOW_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        let initial_ms: u64 = parse(
            &lookup,
            "WORKFLOW_INITIAL_INTERVAL_MS",
            default_retry.initial_interval.as_millis() as u64,
        )?;
        let max_ms: u64 = parse(
            &lookup,
            "WORKFLOW_MAX_INTERVAL_MS",
            default_retry.max_interval.as_millis() as u64,
        )?;
        let multiplier: f64 = parse(&lookup, "WORKFLOW_BACKOFF_MULTIPLIER", default_retry.multiplier)?;
        if !(multiplier >= 1.0 && multiplier.is_finite()) {
            return Err(invalid(
                "WORKFLOW_BACKOFF_MULTIPLIER",
                &multiplier.to_string(),
                "must be a finite number >= 1.0",
            ));
        }

        let notification_mode = match lookup("NOTIFICATION_MODE") {
            None => defaults.notification_mode,
            Some(raw) => raw
                .parse()
                .map_err(|reason: String| invalid("NOTIFICATION_MODE", &raw, &reason))?,
        };

        let poll_ms: u64 = parse(
            &lookup,
            "OUTBOX_POLL_INTERVAL_MS",
            defaults.outbox_poll_interval.as_millis() as u64,
        )?;

        Ok(Self {
            database_url,
            workflow_retry: RetryPolicy::exponential(
                max_attempts,
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms.max(initial_ms)),
            )
            .with_multiplier(multiplier),
            notification_mode,
            outbox_poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
