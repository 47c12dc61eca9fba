mod api_error;
mod approvals;
mod bootstrap;
mod channel;
mod collaborators;
mod forwarder;
mod health;
mod process;
#[cfg(test)]
mod scenarios;
mod workflow;

use std::future::IntoFuture;
use std::time::Duration;

use anyhow::{Context, Result};
use signoff_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use signoff_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        role = app.config.server.role.as_str(),
        "signoff-server listening"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if wait_for_shutdown().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });

    let mut drain_rx = stop_rx.clone();
    let mut serve_rx = stop_rx;
    let serve = axum::serve(listener, app.router)
        .with_graceful_shutdown(async move {
            let _ = serve_rx.changed().await;
        })
        .into_future();

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    tokio::select! {
        result = serve => result.context("http server failed")?,
        _ = async {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                event_name = "system.server.drain_timeout",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish before the grace period ended"
            );
        }
    }

    for handle in &app.background {
        handle.abort();
    }
    if let Some(pool) = &app.db_pool {
        pool.close().await;
    }

    info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "signoff-server stopped"
    );
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(event_name = "system.server.stopping", correlation_id = "shutdown", "shutdown requested");
    Ok(())
}
