#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Result;
use burrow_common::crypto::{CryptoEngine, KeyContext};
use burrowd::config::{Args, ServerConfig};
use burrowd::metrics::{start_metrics_server, HealthState};
use burrowd::{console, server, stats};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: ServerConfig = args.into();
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    info!(
        "burrowd v{} starting on {} ({})",
        env!("CARGO_PKG_VERSION"),
        config.listen,
        config.algorithm
    );

    let key_context = KeyContext::generate();
    info!(
        "generated process key, fingerprint {}",
        &key_context.key_hex()[..8]
    );
    warn!("every client receives the same key material in its welcome frame");

    let mut handle = match server::start(config.clone(), CryptoEngine::new(key_context)).await {
        Ok(handle) => handle,
        Err(e) => anyhow::bail!("failed to start relay: {}", e),
    };
    info!("relay ready on {}", handle.local_addr());

    let health_state = HealthState::new();
    health_state.set_ready(true);
    {
        let health_state = health_state.clone();
        let state = handle.state();
        let metrics_addr = config.metrics_addr;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state, state).await {
                warn!("metrics server error: {}", e);
            }
        });
    }

    if config.stats_interval > 0 {
        let state = handle.state();
        let period = Duration::from_secs(config.stats_interval);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                let snap = stats::snapshot(&state);
                info!(
                    clients = snap.connected_clients,
                    rx_bytes = snap.total_bytes_received,
                    tx_bytes = snap.total_bytes_sent,
                    uptime_secs = snap.uptime_secs,
                    "relay stats"
                );
            }
        });
    }

    let (quit_tx, mut quit_rx) = mpsc::channel::<()>(1);
    if config.console {
        tokio::spawn(console::run(handle.state(), quit_tx));
    }

    tokio::select! {
        result = handle.finished() => {
            if let Err(e) = result {
                error!("relay failed: {}", e);
            }
            anyhow::bail!("relay exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        Some(()) = quit_rx.recv() => {
            info!("shutdown requested from console");
        }
    }

    handle.stop().await?;
    info!("relay stopped");
    Ok(())
}
