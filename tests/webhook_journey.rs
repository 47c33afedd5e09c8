//! Integration tests for the webhook delivery journeys.
//!
//! These exercise the public API end to end: registering subscriptions,
//! triggering events, retrying failed deliveries, signing payloads and
//! driving the management API. No external network is touched; HTTP
//! receivers are bound to 127.0.0.1.
//!
//! Run: `cargo test --test webhook_journey`

/// Scripted transport shared by the journeys below.
mod support {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use webhook_notifier::config::NotifierConfig;
    use webhook_notifier::error::DeliveryError;
    use webhook_notifier::webhooks::{TransportResponse, WebhookTransport};

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl RecordedCall {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    /// Answers with queued status codes, then `fallback` once the script runs out.
    pub struct MockTransport {
        script: Mutex<VecDeque<u16>>,
        fallback: u16,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl MockTransport {
        pub fn new(script: &[u16], fallback: u16) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WebhookTransport for MockTransport {
        async fn post(
            &self,
            url: &str,
            headers: &[(String, String)],
            body: &str,
            _timeout: Duration,
        ) -> Result<TransportResponse, DeliveryError> {
            self.calls.lock().unwrap().push(RecordedCall {
                url: url.to_string(),
                headers: headers.to_vec(),
                body: body.to_string(),
            });
            let status = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
            Ok(TransportResponse {
                status,
                body: String::new(),
            })
        }
    }

    /// Millisecond backoff so retry journeys finish quickly.
    pub fn fast_config() -> NotifierConfig {
        NotifierConfig {
            backoff_unit: Duration::from_millis(1),
            poll_interval: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(500),
            ..NotifierConfig::default()
        }
    }
}

// ============================================================================
// 1. Subscription Management Journey
// ============================================================================
mod subscription_management {
    use std::sync::Arc;

    use webhook_notifier::webhooks::{EventType, SubscriptionConfig, WebhookNotifier};

    use super::support::{MockTransport, fast_config};

    fn notifier() -> WebhookNotifier {
        WebhookNotifier::new(fast_config(), Arc::new(MockTransport::new(&[], 200)))
    }

    fn config(url: &str, events: &[EventType]) -> SubscriptionConfig {
        SubscriptionConfig {
            url: url.to_string(),
            event_types: events.to_vec(),
            active: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_assigns_defaults() {
        let notifier = notifier();
        let sub = notifier
            .register(
                "t1",
                config("https://example.test/a", &[EventType::WorkflowCompleted]),
            )
            .await
            .unwrap();

        assert!(!sub.id.is_empty());
        assert_eq!(sub.tenant_id, "t1");
        assert_eq!(sub.retry_budget, 3);
        assert!(sub.active);
        assert!(sub.last_triggered_at.is_none());
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let notifier = notifier();
        let a = notifier
            .register("t1", config("https://example.test/a", &[EventType::TaskFailed]))
            .await
            .unwrap();
        notifier
            .register("t2", config("https://example.test/b", &[EventType::TaskFailed]))
            .await
            .unwrap();

        assert_eq!(notifier.list("t1").await.len(), 1);
        assert_eq!(notifier.list("t2").await.len(), 1);
        assert!(notifier.list("t3").await.is_empty());

        // Removing with the wrong tenant is a no-op.
        assert!(!notifier.remove("t2", &a.id).await);
        assert!(notifier.remove("t1", &a.id).await);
        assert!(notifier.list("t1").await.is_empty());
        assert!(!notifier.remove("t1", &a.id).await);
    }

    #[tokio::test]
    async fn test_invalid_registrations_are_rejected() {
        let notifier = notifier();
        assert!(notifier
            .register("t1", config("not a url", &[EventType::TaskFailed]))
            .await
            .is_err());
        assert!(notifier
            .register("t1", config("https://example.test/a", &[]))
            .await
            .is_err());
        assert!(notifier
            .register("", config("https://example.test/a", &[EventType::TaskFailed]))
            .await
            .is_err());
        assert!(notifier.list("t1").await.is_empty());
    }
}

// ============================================================================
// 2. Delivery & Retry Journey
// ============================================================================
mod delivery_retry {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use webhook_notifier::webhooks::{
        EventType, LifecycleEvent, SubscriptionConfig, WebhookNotifier, signer,
    };

    use super::support::{MockTransport, fast_config};

    #[tokio::test]
    async fn test_signed_delivery_retries_then_succeeds() {
        let transport = Arc::new(MockTransport::new(&[500], 200));
        let notifier = WebhookNotifier::new(fast_config(), transport.clone());
        let mut events = notifier.subscribe();

        let sub = notifier
            .register(
                "t1",
                SubscriptionConfig {
                    url: "http://example.test/hook".to_string(),
                    event_types: vec![EventType::WorkflowCompleted],
                    secret: Some("abc".to_string()),
                    retry_budget: Some(2),
                    active: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let queued = notifier
            .trigger(EventType::WorkflowCompleted, "t1", json!({"runId": "r1"}))
            .await;
        assert_eq!(queued, 1);
        notifier.drain().await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].url, "http://example.test/hook");
        assert_eq!(calls[0].body, calls[1].body);
        assert_eq!(
            calls[0].header("X-Webhook-Signature"),
            calls[1].header("X-Webhook-Signature")
        );
        assert_eq!(
            calls[0].header("X-Webhook-Event"),
            Some("workflow.completed")
        );
        assert_eq!(calls[0].header("Content-Type"), Some("application/json"));

        let body: Value = serde_json::from_str(&calls[0].body).unwrap();
        assert_eq!(body["event"], "workflow.completed");
        assert_eq!(body["licenseKey"], "t1");
        assert_eq!(body["data"]["runId"], "r1");
        let expected = signer::sign(&body["data"], "abc").unwrap();
        assert_eq!(body["signature"].as_str(), Some(expected.as_str()));
        assert_eq!(calls[0].header("X-Webhook-Signature"), Some(expected.as_str()));

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
            if let LifecycleEvent::Delivered(delivered) = event {
                assert_eq!(delivered.webhook_id, sub.id);
                assert_eq!(delivered.status_code, 200);
                assert_eq!(delivered.attempts, 2);
            }
        }
        assert_eq!(names, vec!["webhook:retry_scheduled", "webhook:delivered"]);

        let stats = notifier.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.total_attempts, 2);

        let stored = notifier.get("t1", &sub.id).await.unwrap();
        assert!(stored.last_triggered_at.is_some());
    }

    #[tokio::test]
    async fn test_budget_exhaustion_emits_single_failure() {
        let transport = Arc::new(MockTransport::new(&[], 503));
        let notifier = WebhookNotifier::new(fast_config(), transport.clone());
        let mut events = notifier.subscribe();

        let sub = notifier
            .register(
                "t1",
                SubscriptionConfig {
                    url: "http://example.test/hook".to_string(),
                    event_types: vec![EventType::AlertTriggered],
                    retry_budget: Some(3),
                    active: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        notifier
            .trigger(EventType::AlertTriggered, "t1", json!({"level": "high"}))
            .await;
        notifier.drain().await;

        assert_eq!(transport.calls().len(), 3);
        // Unsigned subscriptions still send the header, empty.
        assert_eq!(transport.calls()[0].header("X-Webhook-Signature"), Some(""));

        let mut failures = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::Failed(failed) = event {
                failures.push(failed);
            }
        }
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].webhook_id, sub.id);
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(failures[0].error, "HTTP 503");

        assert!(notifier.get("t1", &sub.id).await.unwrap().last_triggered_at.is_none());
        assert_eq!(notifier.queue_depth().await, (0, 0));
    }

    #[tokio::test]
    async fn test_trigger_without_subscribers_is_noop() {
        let transport = Arc::new(MockTransport::new(&[], 200));
        let notifier = WebhookNotifier::new(fast_config(), transport.clone());
        notifier
            .register(
                "t1",
                SubscriptionConfig {
                    url: "http://example.test/hook".to_string(),
                    event_types: vec![EventType::TaskCompleted],
                    active: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(notifier.trigger(EventType::TaskFailed, "t1", json!({})).await, 0);
        assert_eq!(notifier.trigger(EventType::TaskCompleted, "t2", json!({})).await, 0);
        notifier.drain().await;

        assert!(transport.calls().is_empty());
        assert_eq!(notifier.stats().total_attempts, 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_every_matching_subscription() {
        let transport = Arc::new(MockTransport::new(&[], 200));
        let notifier = WebhookNotifier::new(fast_config(), transport.clone());
        for url in ["http://example.test/a", "http://example.test/b"] {
            notifier
                .register(
                    "t1",
                    SubscriptionConfig {
                        url: url.to_string(),
                        event_types: vec![EventType::QuotaExceeded, EventType::SkillError],
                        active: true,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let queued = notifier
            .trigger(EventType::QuotaExceeded, "t1", json!({"used": 11}))
            .await;
        assert_eq!(queued, 2);
        notifier.drain().await;

        let mut urls: Vec<String> = transport.calls().into_iter().map(|c| c.url).collect();
        urls.sort();
        assert_eq!(urls, vec!["http://example.test/a", "http://example.test/b"]);
        assert_eq!(notifier.stats().delivered, 2);
    }

    #[tokio::test]
    async fn test_background_processor_delivers() {
        let transport = Arc::new(MockTransport::new(&[500, 500], 200));
        let notifier = Arc::new(WebhookNotifier::new(fast_config(), transport.clone()));
        let mut events = notifier.subscribe();
        let mut processor = notifier.start();

        notifier
            .register(
                "t1",
                SubscriptionConfig {
                    url: "http://example.test/hook".to_string(),
                    event_types: vec![EventType::WorkflowFailed],
                    active: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        notifier
            .trigger(EventType::WorkflowFailed, "t1", json!({"runId": "r9"}))
            .await;

        let delivered = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(LifecycleEvent::Delivered(d)) => break d,
                    Ok(_) => continue,
                    Err(e) => panic!("lifecycle channel closed: {}", e),
                }
            }
        })
        .await
        .expect("delivery should complete");

        assert_eq!(delivered.attempts, 3);
        processor.shutdown().await;
        assert!(processor.is_finished());
    }
}

// ============================================================================
// 3. Real HTTP Receiver Journey
// ============================================================================
mod http_receiver {
    use std::sync::Arc;

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use webhook_notifier::config::NotifierConfig;
    use webhook_notifier::webhooks::{
        EventType, LifecycleEvent, SubscriptionConfig, WebhookNotifier, signer,
    };

    /// Receiver that checks the signature header against the body.
    async fn spawn_receiver(secret: &'static str) -> (String, mpsc::UnboundedReceiver<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, body: String| {
                let tx = tx.clone();
                async move {
                    let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                    let signature = headers
                        .get("x-webhook-signature")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    let valid = signer::verify(&payload["data"], secret, signature);
                    let _ = tx.send(valid);
                    if valid {
                        StatusCode::OK
                    } else {
                        StatusCode::UNAUTHORIZED
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), rx)
    }

    #[tokio::test]
    async fn test_receiver_verifies_signature() {
        let (url, mut seen) = spawn_receiver("shared-secret").await;
        let notifier = Arc::new(WebhookNotifier::with_http(NotifierConfig::default()).unwrap());
        let mut events = notifier.subscribe();

        tokio_test::assert_ok!(
            notifier
                .register(
                    "acme",
                    SubscriptionConfig {
                        url,
                        event_types: vec![EventType::TaskCompleted],
                        secret: Some("shared-secret".to_string()),
                        active: true,
                        ..Default::default()
                    },
                )
                .await
        );

        notifier
            .trigger(EventType::TaskCompleted, "acme", json!({"taskId": 42, "ok": true}))
            .await;
        notifier.drain().await;

        assert_eq!(seen.recv().await, Some(true));
        match events.try_recv() {
            Ok(LifecycleEvent::Delivered(d)) => {
                assert_eq!(d.status_code, 200);
                assert_eq!(d.attempts, 1);
            }
            other => panic!("Expected delivered, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accepted_delivery_with_endless_body_is_not_resent() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, mut connections) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let _ = conn_tx.send(());
                tokio::spawn(async move {
                    let mut request = [0u8; 4096];
                    let _ = socket.read(&mut request).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10485760\r\n\r\n")
                        .await;
                    let _ = socket.write_all(&[b'x'; 64 * 1024]).await;
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                });
            }
        });

        let config = NotifierConfig {
            attempt_timeout: std::time::Duration::from_millis(800),
            backoff_unit: std::time::Duration::from_millis(1),
            ..NotifierConfig::default()
        };
        let notifier = Arc::new(WebhookNotifier::with_http(config).unwrap());
        notifier
            .register(
                "acme",
                SubscriptionConfig {
                    url: format!("http://{}/hook", addr),
                    event_types: vec![EventType::TaskCompleted],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        notifier
            .trigger(EventType::TaskCompleted, "acme", json!({"taskId": 1}))
            .await;
        notifier.drain().await;

        let stats = notifier.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.retried, 0);
        assert_eq!(stats.total_attempts, 1);
        assert!(connections.try_recv().is_ok());
        assert!(connections.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_framing_header_cannot_truncate_body() {
        let (url, _seen) = spawn_receiver("shared-secret").await;
        let notifier = Arc::new(WebhookNotifier::with_http(NotifierConfig::default()).unwrap());
        let mut headers = std::collections::HashMap::new();
        headers.insert("content-length".to_string(), "3".to_string());

        let result = notifier
            .register(
                "acme",
                SubscriptionConfig {
                    url,
                    event_types: vec![EventType::TaskFailed],
                    secret: Some("shared-secret".to_string()),
                    headers,
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_err());
        assert!(notifier.list("acme").await.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected_and_retried() {
        let (url, mut seen) = spawn_receiver("shared-secret").await;
        let config = NotifierConfig {
            backoff_unit: std::time::Duration::from_millis(1),
            ..NotifierConfig::default()
        };
        let notifier = Arc::new(WebhookNotifier::with_http(config).unwrap());

        notifier
            .register(
                "acme",
                SubscriptionConfig {
                    url,
                    event_types: vec![EventType::TaskCompleted],
                    secret: Some("other-secret".to_string()),
                    retry_budget: Some(2),
                    active: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        notifier
            .trigger(EventType::TaskCompleted, "acme", json!({"taskId": 7}))
            .await;
        notifier.drain().await;

        assert_eq!(seen.recv().await, Some(false));
        assert_eq!(seen.recv().await, Some(false));
        let stats = notifier.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_attempts, 2);
    }
}

// ============================================================================
// 4. Management API Journey
// ============================================================================
mod management_api {
    use std::sync::Arc;

    use serde_json::{Value, json};
    use webhook_notifier::api::{ApiServer, ApiServerConfig};
    use webhook_notifier::webhooks::WebhookNotifier;

    use super::support::{MockTransport, fast_config};

    #[tokio::test]
    async fn test_register_trigger_and_stats_over_http() {
        let transport = Arc::new(MockTransport::new(&[], 200));
        let notifier = Arc::new(WebhookNotifier::new(fast_config(), transport.clone()));
        let mut processor = notifier.start();
        let mut server = ApiServer::new(
            ApiServerConfig {
                addr: "127.0.0.1:0".parse().unwrap(),
            },
            Arc::clone(&notifier),
        );
        let addr = server.start().await.unwrap();
        let base = format!("http://{}", addr);
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/tenants/t1/webhooks", base))
            .json(&json!({
                "url": "http://example.test/hook",
                "eventTypes": ["skill.error"]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["retryBudget"], 3);

        let response = client
            .post(format!("{}/tenants/t1/events", base))
            .json(&json!({"event": "skill.error", "data": {"skill": "x"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 202);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while notifier.stats().delivered == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("processor should deliver");

        let stats: Value = client
            .get(format!("{}/stats", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["data"]["delivered"], 1);
        assert_eq!(transport.calls().len(), 1);

        server.shutdown().await;
        processor.shutdown().await;
    }
}
