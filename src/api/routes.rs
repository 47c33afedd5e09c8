//! REST routes for subscription management and event triggering.
//!
//! - `POST   /tenants/{tenant}/webhooks`: register
//! - `GET    /tenants/{tenant}/webhooks`: list
//! - `PATCH  /tenants/{tenant}/webhooks/{id}`: toggle `active`
//! - `DELETE /tenants/{tenant}/webhooks/{id}`: remove
//! - `POST   /tenants/{tenant}/events`: trigger (fire-and-forget)
//! - `GET    /stats`: delivery counters and queue depth
//!
//! The tenant segment stands in for the identity the auth layer supplies.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::WebhookError;
use crate::webhooks::{DeliverySnapshot, EventType, SubscriptionConfig, WebhookNotifier};

/// Response envelope for API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Request to trigger an event.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub event: EventType,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Request to toggle a subscription.
#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerAccepted {
    queued: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(flatten)]
    deliveries: DeliverySnapshot,
    queue_ready: usize,
    queue_scheduled: usize,
}

/// Build the router with the notifier applied as state.
pub fn router(notifier: Arc<WebhookNotifier>) -> Router {
    Router::new()
        .route(
            "/tenants/{tenant}/webhooks",
            post(register_webhook).get(list_webhooks),
        )
        .route(
            "/tenants/{tenant}/webhooks/{id}",
            patch(update_webhook).delete(remove_webhook),
        )
        .route("/tenants/{tenant}/events", post(trigger_event))
        .route("/stats", get(stats))
        .with_state(notifier)
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::err(message)),
    )
        .into_response()
}

fn validation_error(e: WebhookError) -> Response {
    bad_request(e.to_string())
}

fn rejected_body(rejection: JsonRejection) -> Response {
    bad_request(rejection.body_text())
}

fn not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::err(format!("Webhook '{}' not found", id))),
    )
        .into_response()
}

async fn register_webhook(
    State(notifier): State<Arc<WebhookNotifier>>,
    Path(tenant): Path<String>,
    body: Result<Json<SubscriptionConfig>, JsonRejection>,
) -> Response {
    let Json(config) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    match notifier.register(&tenant, config).await {
        Ok(subscription) => {
            (StatusCode::CREATED, Json(ApiResponse::ok(subscription))).into_response()
        }
        Err(e) => validation_error(e),
    }
}

async fn list_webhooks(
    State(notifier): State<Arc<WebhookNotifier>>,
    Path(tenant): Path<String>,
) -> Response {
    Json(ApiResponse::ok(notifier.list(&tenant).await)).into_response()
}

async fn update_webhook(
    State(notifier): State<Arc<WebhookNotifier>>,
    Path((tenant, id)): Path<(String, String)>,
    body: Result<Json<UpdateSubscriptionRequest>, JsonRejection>,
) -> Response {
    let Json(update) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    if !notifier.set_active(&tenant, &id, update.active).await {
        return not_found(&id);
    }
    match notifier.get(&tenant, &id).await {
        Some(subscription) => Json(ApiResponse::ok(subscription)).into_response(),
        None => not_found(&id),
    }
}

async fn remove_webhook(
    State(notifier): State<Arc<WebhookNotifier>>,
    Path((tenant, id)): Path<(String, String)>,
) -> Response {
    if notifier.remove(&tenant, &id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(&id)
    }
}

async fn trigger_event(
    State(notifier): State<Arc<WebhookNotifier>>,
    Path(tenant): Path<String>,
    body: Result<Json<TriggerRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    let queued = notifier.trigger(request.event, &tenant, request.data).await;
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(TriggerAccepted { queued })),
    )
        .into_response()
}

async fn stats(State(notifier): State<Arc<WebhookNotifier>>) -> Response {
    let (queue_ready, queue_scheduled) = notifier.queue_depth().await;
    Json(ApiResponse::ok(StatsResponse {
        deliveries: notifier.stats(),
        queue_ready,
        queue_scheduled,
    }))
    .into_response()
}
