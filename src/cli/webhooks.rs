//! Webhook utility commands: signing, verification and test deliveries.

use std::sync::Arc;

use clap::Subcommand;

use crate::config::NotifierConfig;
use crate::webhooks::{
    EventType, LifecycleEvent, SubscriptionConfig, WebhookNotifier, signer,
};

/// Webhook utility commands.
#[derive(Subcommand, Debug)]
pub enum WebhooksCommand {
    /// Compute the signature a receiver should expect for a JSON `data` value.
    Sign {
        /// Shared secret.
        #[arg(short, long)]
        secret: String,
        /// JSON data (the payload's `data` field).
        data: String,
    },
    /// Check a received signature.
    Verify {
        /// Shared secret.
        #[arg(short, long)]
        secret: String,
        /// Hex signature from `X-Webhook-Signature`.
        #[arg(long)]
        signature: String,
        /// JSON data (the payload's `data` field).
        data: String,
    },
    /// Deliver one test event to a URL and report the outcome.
    SendTest {
        /// Target URL.
        #[arg(short, long)]
        url: String,
        /// Event type to send.
        #[arg(short, long, default_value = "alert.triggered")]
        event: String,
        /// HMAC secret for the signature header.
        #[arg(short, long)]
        secret: Option<String>,
        /// JSON data to send.
        #[arg(short, long, default_value = "{\"test\":true}")]
        data: String,
        /// Maximum delivery attempts.
        #[arg(long)]
        retry_budget: Option<u32>,
    },
}

/// Run a webhooks command.
pub async fn run_webhooks_command(
    cmd: &WebhooksCommand,
    config: NotifierConfig,
) -> anyhow::Result<()> {
    match cmd {
        WebhooksCommand::Sign { secret, data } => {
            let value: serde_json::Value = serde_json::from_str(data)?;
            println!("{}", signer::sign(&value, secret)?);
        }
        WebhooksCommand::Verify {
            secret,
            signature,
            data,
        } => {
            let value: serde_json::Value = serde_json::from_str(data)?;
            if signer::verify(&value, secret, signature) {
                println!("Signature valid");
            } else {
                anyhow::bail!("Signature does not match");
            }
        }
        WebhooksCommand::SendTest {
            url,
            event,
            secret,
            data,
            retry_budget,
        } => {
            let event: EventType = event.parse()?;
            let value: serde_json::Value = serde_json::from_str(data)?;
            let notifier = Arc::new(WebhookNotifier::with_http(config)?);
            let mut rx = notifier.subscribe();

            let subscription = notifier
                .register(
                    "cli",
                    SubscriptionConfig {
                        url: url.clone(),
                        event_types: vec![event.clone()],
                        secret: secret.clone(),
                        active: true,
                        retry_budget: *retry_budget,
                        ..Default::default()
                    },
                )
                .await?;

            println!(
                "Sending '{}' to {} (up to {} attempts)...",
                event, subscription.url, subscription.retry_budget
            );
            notifier.trigger(event, "cli", value).await;
            notifier.drain().await;

            while let Ok(outcome) = rx.try_recv() {
                match outcome {
                    LifecycleEvent::RetryScheduled(r) => {
                        println!(
                            "  attempt {} failed: {} (retrying in {:?})",
                            r.attempt, r.error, r.delay
                        );
                    }
                    LifecycleEvent::Delivered(d) => {
                        println!(
                            "Delivered: HTTP {} after {} attempt(s)",
                            d.status_code, d.attempts
                        );
                    }
                    LifecycleEvent::Failed(f) => {
                        anyhow::bail!("Failed after {} attempt(s): {}", f.attempts, f.error);
                    }
                }
            }
        }
    }
    Ok(())
}
