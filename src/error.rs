//! Error types for the webhook notifier.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Subscription validation and bookkeeping errors.
///
/// These are returned synchronously from registration calls. Delivery
/// failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Tenant id is required")]
    MissingTenant,

    #[error("Invalid webhook URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("At least one event type is required")]
    NoEventTypes,

    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    #[error("Retry budget must be at least 1, got {0}")]
    InvalidRetryBudget(u32),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// A single failed delivery attempt.
///
/// Every variant is treated the same by the retry policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}")]
    Status { status: u16, body: String },

    #[error("Invalid delivery URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// HTTP API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

/// Result type alias using the top-level error.
pub type Result<T> = std::result::Result<T, Error>;
