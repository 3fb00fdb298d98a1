use std::sync::Arc;
use std::time::Duration;

use agent_hub::{listen, logging, server};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hub_core::{Hub, HubConfig};

#[derive(Debug, Parser)]
#[command(name = "agent-hub")]
#[command(about = "Coordination hub and client runtime for mention-addressed agent threads")]
struct Cli {
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the coordination hub.
    Serve(ServeCommand),
    /// Run a reference client runtime that logs and acknowledges mentions.
    /// Useful for monitoring a fabric or smoke-testing a deployment.
    Listen(listen::ListenCommand),
}

#[derive(Debug, clap::Args)]
struct ServeCommand {
    /// Address to bind, e.g. 0.0.0.0:5555 for a deployed hub.
    #[arg(long, default_value = "127.0.0.1:5555")]
    bind: String,

    /// Ceiling on wait_for_mentions timeouts in milliseconds.
    #[arg(long, default_value_t = 60_000)]
    max_wait_ms: u64,

    /// Seconds a disconnected agent keeps its registration and buffer.
    #[arg(long, default_value_t = 30)]
    reconnect_grace_secs: u64,

    /// Soft cap on each agent's mention buffer.
    #[arg(long, default_value_t = 1024)]
    mention_buffer_cap: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    match cli.command {
        Commands::Serve(cmd) => run_serve(cmd).await,
        Commands::Listen(cmd) => listen::run_listen(cmd).await,
    }
}

async fn run_serve(cmd: ServeCommand) -> Result<()> {
    let config = HubConfig {
        max_wait_ms: cmd.max_wait_ms,
        reconnect_grace: Duration::from_secs(cmd.reconnect_grace_secs),
        mention_buffer_cap: cmd.mention_buffer_cap,
        ..HubConfig::default()
    };
    let hub = Hub::new(config);

    let listener = tokio::net::TcpListener::bind(&cmd.bind)
        .await
        .with_context(|| format!("failed to bind {}", cmd.bind))?;
    tracing::info!(
        target = "agent_hub::serve",
        addr = %listener.local_addr()?,
        max_wait_ms = cmd.max_wait_ms,
        "hub listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let maintenance = tokio::spawn(Arc::clone(&hub).run_maintenance(shutdown_rx));

    axum::serve(listener, server::router(hub))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target = "agent_hub::serve", "shutting down");
        })
        .await
        .context("hub server error")?;

    let _ = shutdown_tx.send(true);
    let _ = maintenance.await;
    Ok(())
}
