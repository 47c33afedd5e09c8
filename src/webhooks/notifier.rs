//! Webhook notifier: dispatches domain events to matching subscriptions and
//! runs the single queue processor that delivers them.
//!
//! `trigger` never waits on delivery. Every outcome is reported through
//! lifecycle events: `webhook:delivered`, `webhook:failed` and
//! `webhook:retry_scheduled`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::queue::DeliveryQueue;
use super::registry::SubscriptionRegistry;
use super::signer;
use super::transport::{HttpTransport, WebhookTransport};
use super::types::{
    DeliveryItem, DeliveryPayload, EventType, LifecycleEvent, RetryScheduled, Subscription,
    SubscriptionConfig, WebhookDelivered, WebhookFailed,
};
use crate::config::NotifierConfig;
use crate::error::{DeliveryError, WebhookError};

type DeliveredCallback = Arc<dyn Fn(&WebhookDelivered) + Send + Sync>;
type FailedCallback = Arc<dyn Fn(&WebhookFailed) + Send + Sync>;

/// Delay before the attempt following failed attempt `attempt` (1-based):
/// `unit * 2^attempt`, so 2, 4, 8... units.
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    unit.saturating_mul(factor)
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// HTTP attempts made.
    pub total_attempts: AtomicU64,
    /// Items delivered.
    pub delivered: AtomicU64,
    /// Items that exhausted their retry budget.
    pub failed: AtomicU64,
    /// Retries scheduled.
    pub retried: AtomicU64,
}

impl DeliveryMetrics {
    /// Point-in-time snapshot for serialization.
    pub fn snapshot(&self) -> DeliverySnapshot {
        let total_attempts = self.total_attempts.load(Ordering::Relaxed);
        let delivered = self.delivered.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let retried = self.retried.load(Ordering::Relaxed);

        let finished = delivered + failed;
        let success_rate = if finished > 0 {
            delivered as f64 / finished as f64
        } else {
            0.0
        };

        DeliverySnapshot {
            total_attempts,
            delivered,
            failed,
            retried,
            success_rate,
        }
    }
}

/// Snapshot of delivery metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySnapshot {
    pub total_attempts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub retried: u64,
    /// Fraction of finished items that were delivered (0.0 to 1.0).
    pub success_rate: f64,
}

#[derive(Default)]
struct Listeners {
    delivered: Vec<DeliveredCallback>,
    failed: Vec<FailedCallback>,
}

/// Handle to a running queue processor. Dropping it stops the processor.
pub struct ProcessorHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessorHandle {
    /// Stop the processor and wait for it to exit.
    ///
    /// An in-flight attempt finishes first; queued and scheduled items stay
    /// in memory and are lost if the process exits.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the processor task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

/// Webhook delivery engine.
///
/// Constructed explicitly and shared through `Arc`; each instance owns its
/// registry, queue and observers.
pub struct WebhookNotifier {
    config: NotifierConfig,
    registry: SubscriptionRegistry,
    queue: DeliveryQueue,
    transport: Arc<dyn WebhookTransport>,
    events: broadcast::Sender<LifecycleEvent>,
    listeners: RwLock<Listeners>,
    metrics: DeliveryMetrics,
    /// Held while draining so only one logical worker delivers at a time.
    worker: Mutex<()>,
}

impl WebhookNotifier {
    /// Create a notifier delivering through `transport`.
    pub fn new(config: NotifierConfig, transport: Arc<dyn WebhookTransport>) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            registry: SubscriptionRegistry::with_default_retry_budget(config.default_retry_budget),
            queue: DeliveryQueue::new(),
            transport,
            events,
            listeners: RwLock::new(Listeners::default()),
            metrics: DeliveryMetrics::default(),
            worker: Mutex::new(()),
            config,
        }
    }

    /// Create a notifier backed by the reqwest transport.
    pub fn with_http(config: NotifierConfig) -> crate::Result<Self> {
        Ok(Self::new(config, Arc::new(HttpTransport::new()?)))
    }

    /// Active configuration.
    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Register a subscription for `tenant_id`.
    pub async fn register(
        &self,
        tenant_id: &str,
        config: SubscriptionConfig,
    ) -> Result<Subscription, WebhookError> {
        self.registry.register(tenant_id, config).await
    }

    /// Remove a subscription. Unknown ids return `false`.
    pub async fn remove(&self, tenant_id: &str, subscription_id: &str) -> bool {
        self.registry.remove(tenant_id, subscription_id).await
    }

    /// Subscriptions of one tenant.
    pub async fn list(&self, tenant_id: &str) -> Vec<Subscription> {
        self.registry.list(tenant_id).await
    }

    /// Look up one subscription.
    pub async fn get(&self, tenant_id: &str, subscription_id: &str) -> Option<Subscription> {
        self.registry.get(tenant_id, subscription_id).await
    }

    /// Enable or disable a subscription.
    pub async fn set_active(&self, tenant_id: &str, subscription_id: &str, active: bool) -> bool {
        self.registry
            .set_active(tenant_id, subscription_id, active)
            .await
    }

    /// Queue one delivery per active subscription of `tenant_id` that wants
    /// `event`, and wake the processor. Returns the number queued.
    ///
    /// Never fails and never waits on delivery. With no matching
    /// subscriptions this is a silent no-op.
    pub async fn trigger(&self, event: EventType, tenant_id: &str, data: serde_json::Value) -> usize {
        let matching: Vec<Subscription> = self
            .registry
            .list(tenant_id)
            .await
            .into_iter()
            .filter(|s| s.matches(&event))
            .collect();

        if matching.is_empty() {
            tracing::trace!(tenant_id = tenant_id, event = %event, "No webhook subscribers");
            return 0;
        }

        let mut queued = 0;
        for subscription in matching {
            match build_item(subscription, &event, tenant_id, &data) {
                Ok(item) => {
                    tracing::debug!(
                        tenant_id = tenant_id,
                        webhook_id = %item.subscription.id,
                        event = %event,
                        "Webhook delivery queued"
                    );
                    self.queue.enqueue(item).await;
                    queued += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        tenant_id = tenant_id,
                        event = %event,
                        error = %e,
                        "Failed to build webhook payload"
                    );
                }
            }
        }
        if queued > 0 {
            self.queue.wake();
        }
        queued
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Register a callback for `webhook:delivered`.
    pub async fn on_delivered<F>(&self, callback: F)
    where
        F: Fn(&WebhookDelivered) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .await
            .delivered
            .push(Arc::new(callback));
    }

    /// Register a callback for `webhook:failed`.
    pub async fn on_failed<F>(&self, callback: F)
    where
        F: Fn(&WebhookFailed) + Send + Sync + 'static,
    {
        self.listeners.write().await.failed.push(Arc::new(callback));
    }

    /// Delivery counters.
    pub fn stats(&self) -> DeliverySnapshot {
        self.metrics.snapshot()
    }

    /// Items ready plus retries waiting on backoff.
    pub async fn queue_depth(&self) -> (usize, usize) {
        (
            self.queue.ready_len().await,
            self.queue.scheduled_len().await,
        )
    }

    /// Spawn the queue processor.
    ///
    /// It wakes on every trigger, whenever a retry falls due, and on a fixed
    /// poll interval as a fallback.
    pub fn start(self: &Arc<Self>) -> ProcessorHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let notifier = Arc::clone(self);
        let handle = tokio::spawn(async move { notifier.run(shutdown_rx).await });
        ProcessorHandle {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Webhook queue processor started"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.process_ready().await;

            let next_due = self.queue.next_due().await;
            let retry_due = async {
                match next_due {
                    Some(due) => tokio::time::sleep_until(due).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = self.queue.notified() => {}
                _ = retry_due => {}
                _ = poll.tick() => {}
            }
        }

        tracing::info!("Webhook queue processor stopped");
    }

    /// Deliver everything that is ready now, in FIFO order, one at a time.
    /// Returns the number of attempts made.
    pub async fn process_ready(&self) -> usize {
        let _worker = self.worker.lock().await;
        let mut attempts = 0;
        loop {
            self.queue.promote_due(Instant::now()).await;
            let Some(item) = self.queue.pop().await else {
                break;
            };
            self.attempt(item).await;
            attempts += 1;
        }
        attempts
    }

    /// Process until nothing is ready or scheduled, sleeping through backoff.
    pub async fn drain(&self) {
        loop {
            self.process_ready().await;
            if self.queue.is_empty().await {
                break;
            }
            if let Some(due) = self.queue.next_due().await {
                tokio::time::sleep_until(due).await;
            }
        }
    }

    async fn attempt(&self, mut item: DeliveryItem) {
        item.attempts += 1;
        let attempt = item.attempts;
        let webhook_id = item.subscription.id.clone();
        let event = item.payload.event.clone();
        let timeout = self.config.attempt_timeout;

        self.metrics.total_attempts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            webhook_id = %webhook_id,
            event = %event,
            attempt = attempt,
            url = %item.subscription.url,
            "Delivering webhook"
        );

        let headers = item.headers();
        let send = self
            .transport
            .post(&item.subscription.url, &headers, &item.body, timeout);
        let outcome = match tokio::time::timeout(timeout, send).await {
            Ok(Ok(response)) if response.is_success() => Ok(response.status),
            Ok(Ok(response)) => Err(DeliveryError::Status {
                status: response.status,
                body: response.body,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        };

        match outcome {
            Ok(status) => {
                self.registry
                    .mark_triggered(&item.subscription.tenant_id, &webhook_id, Utc::now())
                    .await;
                self.metrics.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    webhook_id = %webhook_id,
                    event = %event,
                    status = status,
                    attempts = attempt,
                    "Webhook delivered"
                );
                self.emit(LifecycleEvent::Delivered(WebhookDelivered {
                    webhook_id,
                    tenant_id: item.subscription.tenant_id.clone(),
                    event,
                    status_code: status,
                    attempts: attempt,
                }))
                .await;
            }
            Err(e) if attempt < item.subscription.retry_budget => {
                let delay = backoff_delay(self.config.backoff_unit, attempt);
                self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    webhook_id = %webhook_id,
                    event = %event,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Webhook attempt failed, retry scheduled"
                );
                self.queue.schedule_retry(item, Instant::now() + delay).await;
                self.emit(LifecycleEvent::RetryScheduled(RetryScheduled {
                    webhook_id,
                    event,
                    attempt,
                    delay,
                    error: e.to_string(),
                }))
                .await;
            }
            Err(e) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    webhook_id = %webhook_id,
                    event = %event,
                    attempts = attempt,
                    error = %e,
                    "Webhook delivery failed after all attempts"
                );
                self.emit(LifecycleEvent::Failed(WebhookFailed {
                    webhook_id,
                    tenant_id: item.subscription.tenant_id.clone(),
                    event,
                    error: e.to_string(),
                    attempts: attempt,
                }))
                .await;
            }
        }
    }

    async fn emit(&self, event: LifecycleEvent) {
        {
            let listeners = self.listeners.read().await;
            match &event {
                LifecycleEvent::Delivered(delivered) => {
                    for callback in &listeners.delivered {
                        callback(delivered);
                    }
                }
                LifecycleEvent::Failed(failed) => {
                    for callback in &listeners.failed {
                        callback(failed);
                    }
                }
                LifecycleEvent::RetryScheduled(_) => {}
            }
        }
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

fn build_item(
    subscription: Subscription,
    event: &EventType,
    tenant_id: &str,
    data: &serde_json::Value,
) -> Result<DeliveryItem, WebhookError> {
    let mut payload = DeliveryPayload::new(event.clone(), tenant_id, data.clone());
    if let Some(secret) = subscription.signing_secret() {
        payload.signature = Some(signer::sign(data, secret)?);
    }
    DeliveryItem::new(subscription, payload)
}
