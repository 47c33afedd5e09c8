//! HTTP API server for the webhook notifier.
//!
//! Hosts the management routes in a single axum server with graceful
//! shutdown.

mod routes;

pub use routes::{ApiResponse, TriggerRequest, UpdateSubscriptionRequest, router};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::webhooks::WebhookNotifier;

/// Configuration for the API server.
pub struct ApiServerConfig {
    /// Address to bind the server to.
    pub addr: SocketAddr,
}

/// The management API server.
pub struct ApiServer {
    config: ApiServerConfig,
    notifier: Arc<WebhookNotifier>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    /// Create a server for `notifier` with the given bind address.
    pub fn new(config: ApiServerConfig, notifier: Arc<WebhookNotifier>) -> Self {
        Self {
            config,
            notifier,
            local_addr: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind the listener and spawn the server.
    pub async fn start(&mut self) -> Result<SocketAddr, ApiError> {
        let app = router(Arc::clone(&self.notifier)).layer(TraceLayer::new_for_http());

        let listener = tokio::net::TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| ApiError::Bind {
                addr: self.config.addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ApiError::Bind {
            addr: self.config.addr.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!("Webhook API listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Webhook API shutting down");
                })
                .await
            {
                tracing::error!("Webhook API error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(local_addr)
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
