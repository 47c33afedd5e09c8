//! Outbound HTTP transport for webhook deliveries.
//!
//! A transport performs exactly one POST per call. It never retries; the
//! queue processor owns all retry policy.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use crate::error::DeliveryError;

/// Outcome of a request that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    /// 2xx responses count as delivered.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a single outbound webhook POST.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` to `url`. Resolves with the response for any status code,
    /// or an error on transport failure or timeout.
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, DeliveryError>;
}

/// Maximum number of response body bytes retained for diagnostics.
const MAX_RESPONSE_BODY: usize = 4096;

/// Upper bound on time spent reading a response body once the status is known.
const MAX_BODY_READ: Duration = Duration::from_secs(1);

/// reqwest-backed transport.
///
/// The timeout is applied per request; on expiry reqwest drops the
/// connection rather than leaving it running in the background.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh client.
    pub fn new() -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("webhook-notifier/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, DeliveryError> {
        let started = Instant::now();
        let target = parse_target(url)?;

        let mut request = self
            .client
            .post(target)
            .timeout(timeout)
            .body(body.to_string());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let mut response = request.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status().as_u16();

        // The outcome is fixed once the status line arrives. The body is kept
        // for diagnostics only and must finish well inside the attempt timeout.
        let remaining = timeout.saturating_sub(started.elapsed());
        let budget = (remaining / 2).min(MAX_BODY_READ);
        let body = read_capped(&mut response, MAX_RESPONSE_BODY, budget).await;

        Ok(TransportResponse { status, body })
    }
}

/// Read at most `limit` body bytes within `budget`. A stalled or broken body
/// just ends the read early.
async fn read_capped(response: &mut reqwest::Response, limit: usize, budget: Duration) -> String {
    let deadline = Instant::now() + budget;
    let mut buf = Vec::new();
    while buf.len() < limit {
        match tokio::time::timeout_at(deadline, response.chunk()).await {
            Ok(Ok(Some(chunk))) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            _ => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Parse and check a delivery URL.
pub fn parse_target(url: &str) -> Result<Url, DeliveryError> {
    let parsed = Url::parse(url).map_err(|e| DeliveryError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DeliveryError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                other
            )));
        }
    }
    if parsed.host_str().is_none() {
        return Err(DeliveryError::InvalidUrl("missing host".to_string()));
    }
    Ok(parsed)
}

fn classify(e: reqwest::Error, timeout: Duration) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Timeout(timeout)
    } else {
        DeliveryError::Transport(e.to_string())
    }
}
