//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the notifier with its HTTP API (`serve`)
//! - Webhook utilities (`webhooks sign`, `webhooks verify`, `webhooks send-test`)

mod webhooks;

pub use webhooks::{WebhooksCommand, run_webhooks_command};

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "webhook-notifier")]
#[command(about = "Multi-tenant outbound webhook delivery engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Per-attempt HTTP timeout in milliseconds
    #[arg(long, global = true, env = "WEBHOOK_ATTEMPT_TIMEOUT_MS")]
    pub attempt_timeout_ms: Option<u64>,

    /// Backoff unit in milliseconds (retry k waits unit * 2^k)
    #[arg(long, global = true, env = "WEBHOOK_BACKOFF_UNIT_MS")]
    pub backoff_unit_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "LOG_FORMAT_JSON")]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the queue processor and HTTP API (default if no subcommand given)
    Serve {
        /// Address to bind the API to
        #[arg(long, env = "WEBHOOK_API_ADDR")]
        addr: Option<SocketAddr>,
    },

    /// Webhook utilities
    #[command(subcommand)]
    Webhooks(WebhooksCommand),
}
