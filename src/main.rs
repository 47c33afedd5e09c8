use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use webhook_notifier::api::{ApiServer, ApiServerConfig};
use webhook_notifier::cli::{Cli, Command, run_webhooks_command};
use webhook_notifier::config::NotifierConfig;
use webhook_notifier::webhooks::{LifecycleEvent, WebhookNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = load_config(&cli)?;

    match cli.command {
        None => serve(config).await,
        Some(Command::Serve { addr }) => {
            if let Some(addr) = addr {
                config.api_addr = addr;
            }
            serve(config).await
        }
        Some(Command::Webhooks(cmd)) => run_webhooks_command(&cmd, config).await,
    }
}

/// Environment first, then CLI overrides.
fn load_config(cli: &Cli) -> webhook_notifier::Result<NotifierConfig> {
    let mut config = NotifierConfig::from_env()?;
    if let Some(ms) = cli.attempt_timeout_ms {
        config.attempt_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.backoff_unit_ms {
        config.backoff_unit = Duration::from_millis(ms);
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("webhook_notifier=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: NotifierConfig) -> anyhow::Result<()> {
    let addr = config.api_addr;
    let notifier = Arc::new(WebhookNotifier::with_http(config)?);

    // Forward terminal failures to the log; an audit sink would subscribe here.
    let mut events = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LifecycleEvent::Failed(failed)) => {
                    tracing::warn!(
                        webhook_id = %failed.webhook_id,
                        tenant_id = %failed.tenant_id,
                        event = %failed.event,
                        attempts = failed.attempts,
                        error = %failed.error,
                        "webhook:failed"
                    );
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Lifecycle listener lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut processor = notifier.start();
    let mut server = ApiServer::new(ApiServerConfig { addr }, Arc::clone(&notifier));
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    server.shutdown().await;
    processor.shutdown().await;

    let (ready, scheduled) = notifier.queue_depth().await;
    if ready + scheduled > 0 {
        tracing::warn!(
            ready = ready,
            scheduled = scheduled,
            "Exiting with undelivered webhooks"
        );
    }
    Ok(())
}
