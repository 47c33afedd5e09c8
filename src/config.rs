//! Runtime configuration loaded from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default per-attempt HTTP timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default interval of the background queue poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default backoff unit; the delay before attempt `k + 1` is `unit * 2^k`.
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);
/// Default maximum delivery attempts per event.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Configuration for the webhook notifier.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Timeout applied to every HTTP attempt.
    pub attempt_timeout: Duration,
    /// How often the processor wakes up even without new triggers.
    pub poll_interval: Duration,
    /// Unit of the exponential backoff.
    pub backoff_unit: Duration,
    /// Retry budget used when a registration omits one.
    pub default_retry_budget: u32,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_channel_capacity: usize,
    /// Bind address of the HTTP API.
    pub api_addr: SocketAddr,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            default_retry_budget: DEFAULT_RETRY_BUDGET,
            event_channel_capacity: 256,
            api_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
        }
    }
}

impl NotifierConfig {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Missing keys fall back to defaults; present but malformed keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let attempt_timeout = parse_millis(&lookup, "WEBHOOK_ATTEMPT_TIMEOUT_MS")?
            .unwrap_or(defaults.attempt_timeout);
        let poll_interval =
            parse_millis(&lookup, "WEBHOOK_POLL_INTERVAL_MS")?.unwrap_or(defaults.poll_interval);
        let backoff_unit =
            parse_millis(&lookup, "WEBHOOK_BACKOFF_UNIT_MS")?.unwrap_or(defaults.backoff_unit);
        let default_retry_budget = parse::<u32>(&lookup, "WEBHOOK_DEFAULT_RETRY_BUDGET")?
            .unwrap_or(defaults.default_retry_budget);
        let event_channel_capacity = parse::<usize>(&lookup, "WEBHOOK_EVENT_CHANNEL_CAPACITY")?
            .unwrap_or(defaults.event_channel_capacity);
        let api_addr = parse::<SocketAddr>(&lookup, "WEBHOOK_API_ADDR")?.unwrap_or(defaults.api_addr);

        let config = Self {
            attempt_timeout,
            poll_interval,
            backoff_unit,
            default_retry_budget,
            event_channel_capacity,
            api_addr,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempt_timeout.is_zero() {
            return Err(invalid("WEBHOOK_ATTEMPT_TIMEOUT_MS", "must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("WEBHOOK_POLL_INTERVAL_MS", "must be greater than zero"));
        }
        if self.default_retry_budget == 0 {
            return Err(invalid("WEBHOOK_DEFAULT_RETRY_BUDGET", "must be at least 1"));
        }
        if self.event_channel_capacity == 0 {
            return Err(invalid("WEBHOOK_EVENT_CHANNEL_CAPACITY", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, format!("'{}': {}", raw, e))),
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(lookup, key)?.map(Duration::from_millis))
}
