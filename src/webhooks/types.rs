//! Webhook data model: event types, subscriptions, payloads and lifecycle events.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WebhookError;

/// Kind of domain occurrence that can trigger deliveries.
///
/// The known tags are enumerated; any other dotted tag is carried as `Custom`
/// so new producers do not require a release of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventType {
    WorkflowCompleted,
    WorkflowFailed,
    TaskCompleted,
    TaskFailed,
    SkillError,
    QuotaExceeded,
    AlertTriggered,
    Custom(String),
}

impl EventType {
    /// All built-in event types.
    pub const KNOWN: [EventType; 7] = [
        EventType::WorkflowCompleted,
        EventType::WorkflowFailed,
        EventType::TaskCompleted,
        EventType::TaskFailed,
        EventType::SkillError,
        EventType::QuotaExceeded,
        EventType::AlertTriggered,
    ];

    /// Wire tag, e.g. `workflow.completed`.
    pub fn as_str(&self) -> &str {
        match self {
            Self::WorkflowCompleted => "workflow.completed",
            Self::WorkflowFailed => "workflow.failed",
            Self::TaskCompleted => "task.completed",
            Self::TaskFailed => "task.failed",
            Self::SkillError => "skill.error",
            Self::QuotaExceeded => "quota.exceeded",
            Self::AlertTriggered => "alert.triggered",
            Self::Custom(tag) => tag,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        if let Some(known) = Self::KNOWN.iter().find(|e| e.as_str() == tag) {
            return Ok(known.clone());
        }
        let well_formed = !tag.is_empty()
            && tag.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            });
        if well_formed {
            Ok(Self::Custom(tag.to_string()))
        } else {
            Err(WebhookError::InvalidEventType(s.to_string()))
        }
    }
}

impl TryFrom<String> for EventType {
    type Error = WebhookError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

/// Headers that describe message framing. Subscribers may not set them.
pub(crate) const RESERVED_HEADERS: [&str; 3] = ["content-length", "transfer-encoding", "host"];

/// Whether `name` is one of [`RESERVED_HEADERS`], ignoring case.
pub(crate) fn is_reserved_header(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

/// Registration input for a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    /// Destination endpoint (absolute http or https URL).
    pub url: String,
    /// Event types to receive; must be non-empty.
    pub event_types: Vec<EventType>,
    /// Extra headers sent with every delivery.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Shared secret used to sign payloads.
    #[serde(default)]
    pub secret: Option<String>,
    /// Inactive subscriptions are never matched.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Maximum delivery attempts per event. Falls back to the configured default.
    #[serde(default)]
    pub retry_budget: Option<u32>,
}

fn default_active() -> bool {
    true
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            event_types: Vec::new(),
            headers: HashMap::new(),
            secret: None,
            active: default_active(),
            retry_budget: None,
        }
    }
}

/// A tenant's registered interest in webhook deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub event_types: BTreeSet<EventType>,
    pub headers: HashMap<String, String>,
    /// Never serialized back to API callers.
    #[serde(skip_serializing, default)]
    pub secret: Option<String>,
    pub active: bool,
    pub retry_budget: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Whether an event of this type should be delivered to this subscription.
    pub fn matches(&self, event: &EventType) -> bool {
        self.active && self.event_types.contains(event)
    }

    /// Secret used to sign payloads, if the subscription has a non-empty one.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// JSON envelope delivered to subscriber endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub event: EventType,
    /// Tenant id; the wire name is kept for existing receivers.
    #[serde(rename = "licenseKey")]
    pub tenant_id: String,
    /// ISO-8601 capture time.
    pub timestamp: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

impl DeliveryPayload {
    /// Create an unsigned payload stamped with the current time.
    pub fn new(event: EventType, tenant_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event,
            tenant_id: tenant_id.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
            signature: None,
        }
    }
}

/// A queued delivery: a subscription snapshot plus its pre-serialized payload.
///
/// The body is rendered once at dispatch so every retry resends identical bytes.
#[derive(Debug, Clone)]
pub struct DeliveryItem {
    pub subscription: Subscription,
    pub payload: DeliveryPayload,
    pub body: String,
    /// Attempts already made (0 while freshly queued).
    pub attempts: u32,
}

impl DeliveryItem {
    /// Build an item, rendering the payload body.
    pub fn new(subscription: Subscription, payload: DeliveryPayload) -> Result<Self, WebhookError> {
        let body = serde_json::to_string(&payload)?;
        Ok(Self {
            subscription,
            payload,
            body,
            attempts: 0,
        })
    }

    /// Header set for an attempt, including subscriber custom headers.
    ///
    /// Custom headers are applied last and may override the defaults, except
    /// for the framing headers in [`RESERVED_HEADERS`].
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Content-Length".to_string(), self.body.len().to_string()),
            (
                "X-Webhook-Event".to_string(),
                self.payload.event.to_string(),
            ),
            (
                "X-Webhook-Signature".to_string(),
                self.payload.signature.clone().unwrap_or_default(),
            ),
        ];
        for (name, value) in &self.subscription.headers {
            if is_reserved_header(name) {
                continue;
            }
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }
        headers
    }
}

/// A delivery succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivered {
    pub webhook_id: String,
    pub tenant_id: String,
    pub event: EventType,
    pub status_code: u16,
    pub attempts: u32,
}

/// A delivery exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookFailed {
    pub webhook_id: String,
    pub tenant_id: String,
    pub event: EventType,
    pub error: String,
    pub attempts: u32,
}

/// A failed attempt was rescheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryScheduled {
    pub webhook_id: String,
    pub event: EventType,
    /// Attempt that just failed (1-based).
    pub attempt: u32,
    #[serde(with = "duration_millis", rename = "delayMs")]
    pub delay: Duration,
    pub error: String,
}

/// Lifecycle notifications published by the queue processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    #[serde(rename = "webhook:delivered")]
    Delivered(WebhookDelivered),
    #[serde(rename = "webhook:failed")]
    Failed(WebhookFailed),
    #[serde(rename = "webhook:retry_scheduled")]
    RetryScheduled(RetryScheduled),
}

impl LifecycleEvent {
    /// Topic name as published to observers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delivered(_) => "webhook:delivered",
            Self::Failed(_) => "webhook:failed",
            Self::RetryScheduled(_) => "webhook:retry_scheduled",
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
