//! Per-tenant subscription registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::transport::parse_target;
use super::types::{Subscription, SubscriptionConfig, is_reserved_header};
use crate::config::DEFAULT_RETRY_BUDGET;
use crate::error::WebhookError;

/// In-memory mapping of tenant id to that tenant's subscriptions.
///
/// Every operation is scoped by tenant; there is no cross-tenant lookup.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    tenants: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    default_retry_budget: u32,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_default_retry_budget(DEFAULT_RETRY_BUDGET)
    }

    /// Create an empty registry using `budget` when registrations omit one.
    pub fn with_default_retry_budget(budget: u32) -> Self {
        Self {
            tenants: Arc::new(RwLock::new(HashMap::new())),
            default_retry_budget: budget.max(1),
        }
    }

    /// Validate `config` and store a new subscription for `tenant_id`.
    pub async fn register(
        &self,
        tenant_id: &str,
        config: SubscriptionConfig,
    ) -> Result<Subscription, WebhookError> {
        let subscription = self.build(tenant_id, config)?;
        self.tenants
            .write()
            .await
            .entry(tenant_id.to_string())
            .or_default()
            .push(subscription.clone());

        tracing::debug!(
            tenant_id = tenant_id,
            webhook_id = %subscription.id,
            url = %subscription.url,
            "Webhook subscription registered"
        );
        Ok(subscription)
    }

    /// Remove a subscription. Returns whether anything was removed.
    pub async fn remove(&self, tenant_id: &str, subscription_id: &str) -> bool {
        let mut tenants = self.tenants.write().await;
        let Some(list) = tenants.get_mut(tenant_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != subscription_id);
        let removed = list.len() < before;
        if list.is_empty() {
            tenants.remove(tenant_id);
        }
        removed
    }

    /// Subscriptions of one tenant, in registration order.
    pub async fn list(&self, tenant_id: &str) -> Vec<Subscription> {
        self.tenants
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up one subscription.
    pub async fn get(&self, tenant_id: &str, subscription_id: &str) -> Option<Subscription> {
        self.tenants
            .read()
            .await
            .get(tenant_id)
            .and_then(|list| list.iter().find(|s| s.id == subscription_id).cloned())
    }

    /// Enable or disable a subscription. Returns whether it exists.
    pub async fn set_active(&self, tenant_id: &str, subscription_id: &str, active: bool) -> bool {
        let mut tenants = self.tenants.write().await;
        if let Some(list) = tenants.get_mut(tenant_id)
            && let Some(sub) = list.iter_mut().find(|s| s.id == subscription_id)
        {
            sub.active = active;
            return true;
        }
        false
    }

    /// Record a successful delivery time. A removed subscription is ignored.
    pub async fn mark_triggered(&self, tenant_id: &str, subscription_id: &str, at: DateTime<Utc>) {
        let mut tenants = self.tenants.write().await;
        if let Some(list) = tenants.get_mut(tenant_id)
            && let Some(sub) = list.iter_mut().find(|s| s.id == subscription_id)
        {
            sub.last_triggered_at = Some(at);
        }
    }

    fn build(
        &self,
        tenant_id: &str,
        config: SubscriptionConfig,
    ) -> Result<Subscription, WebhookError> {
        if tenant_id.trim().is_empty() {
            return Err(WebhookError::MissingTenant);
        }

        let url = config.url.trim();
        if url.is_empty() {
            return Err(WebhookError::InvalidUrl {
                url: String::new(),
                reason: "URL is required".to_string(),
            });
        }
        parse_target(url).map_err(|e| WebhookError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if config.event_types.is_empty() {
            return Err(WebhookError::NoEventTypes);
        }

        let retry_budget = config.retry_budget.unwrap_or(self.default_retry_budget);
        if retry_budget == 0 {
            return Err(WebhookError::InvalidRetryBudget(retry_budget));
        }

        for (name, value) in &config.headers {
            if is_reserved_header(name) {
                return Err(WebhookError::InvalidHeader {
                    name: name.clone(),
                    reason: "framing header is computed per delivery".to_string(),
                });
            }
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| WebhookError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            HeaderValue::from_str(value).map_err(|e| WebhookError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(Subscription {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            url: url.to_string(),
            event_types: config.event_types.into_iter().collect(),
            headers: config.headers,
            secret: config.secret.filter(|s| !s.is_empty()),
            active: config.active,
            retry_budget,
            created_at: Utc::now(),
            last_triggered_at: None,
        })
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
