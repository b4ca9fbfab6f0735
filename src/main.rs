//! Command-line entrypoint for db-webhook-relay
//!
//! ```bash
//! db-webhook-relay --config config.yaml
//! DB_LISTENER_CONFIG=/etc/relay.yaml db-webhook-relay --check
//! ```

use anyhow::Context;
use clap::Parser;
use db_webhook_relay::config::DEFAULT_CONFIG_PATH;
use db_webhook_relay::{logging, Config, Listener};
use relay_core::is_cancelled;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use webhook_sink::WebhookNotifier;

#[derive(Parser)]
#[command(name = "db-webhook-relay")]
#[command(about = "Capture row changes from PostgreSQL or MySQL and post them to a webhook")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, env = "DB_LISTENER_CONFIG")]
    config: PathBuf,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    if cli.check {
        for line in config.summary() {
            println!("{line}");
        }
        println!("Configuration OK");
        return Ok(());
    }

    logging::init(&config.logging)?;

    info!("=== Starting db-webhook-relay ===");
    config.log_summary();

    let notifier = Arc::new(
        WebhookNotifier::new(config.webhook_config()).context("Failed to build webhook client")?,
    );
    let mut listener = Listener::new(&config, notifier)
        .await
        .context("Failed to initialize listener")?;

    let cancel = CancellationToken::new();
    info!(
        "Watching table '{}', waiting for changes",
        config.database.table
    );

    let result = {
        let listen = listener.listen(cancel.clone());
        tokio::pin!(listen);
        tokio::select! {
            result = &mut listen => result,
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping");
                cancel.cancel();
                listen.await
            }
        }
    };

    if let Err(e) = listener.close().await {
        error!("Failed to close listener: {e:#}");
    }

    match result {
        Err(e) if !is_cancelled(&e) => {
            error!("Listener failed: {e:#}");
            Err(e)
        }
        _ => {
            info!("=== db-webhook-relay stopped ===");
            Ok(())
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
