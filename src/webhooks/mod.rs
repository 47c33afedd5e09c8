//! Outbound webhook delivery engine.
//!
//! - `registry`: per-tenant subscriptions
//! - `notifier`: event dispatch and the queue processor
//! - `queue`: ready FIFO plus scheduled retries
//! - `transport`: single-shot HTTP POST
//! - `signer`: HMAC-SHA256 payload signatures

mod notifier;
mod queue;
mod registry;
pub mod signer;
pub mod transport;
mod types;

pub use notifier::{
    DeliveryMetrics, DeliverySnapshot, ProcessorHandle, WebhookNotifier, backoff_delay,
};
pub use queue::DeliveryQueue;
pub use registry::SubscriptionRegistry;
pub use transport::{HttpTransport, TransportResponse, WebhookTransport};
pub use types::{
    DeliveryItem, DeliveryPayload, EventType, LifecycleEvent, RetryScheduled, Subscription,
    SubscriptionConfig, WebhookDelivered, WebhookFailed,
};
