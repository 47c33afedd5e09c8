//! Multi-tenant outbound webhook delivery.
//!
//! Tenants register subscriptions (URL, event types, optional secret and
//! headers). Domain code calls [`WebhookNotifier::trigger`]; matching
//! subscriptions get a signed JSON payload POSTed by a single background
//! processor that retries failures with exponential backoff and reports the
//! outcome as lifecycle events.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod webhooks;

pub use config::NotifierConfig;
pub use error::{Error, Result};
pub use webhooks::WebhookNotifier;
