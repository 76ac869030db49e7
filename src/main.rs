mod aggregator;
mod api;
mod config;
mod db;
mod error;
mod hub;
mod source;
mod state;
mod types;
mod ws;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aggregator::Aggregator;
use crate::api::fanout::FanoutStats;
use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, ABOVE_THRESHOLD_MS, CHANNEL_CAPACITY, SHUTDOWN_GRACE_SECS};
use crate::db::LogWriter;
use crate::error::{AppError, Result};
use crate::hub::StatsHub;
use crate::state::ClientRegistry;
use crate::ws::broadcast::Broadcaster;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Persistence log (fatal if it cannot be opened or created) ---
    let writer = LogWriter::open(&cfg.log_path)?;

    // --- Shared state ---
    let health = Arc::new(HealthState::new());
    let fanout = Arc::new(FanoutStats::new());
    let registry = ClientRegistry::new();
    let broadcaster = Broadcaster::new(Arc::clone(&registry), Arc::clone(&fanout));
    let hub = StatsHub::new(writer, broadcaster, Arc::clone(&health));
    info!(
        path = %hub.log_path().display(),
        records = health.records_written(),
        "Persistence log ready"
    );

    // --- Channels ---
    let (sample_tx, sample_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- Spawn tasks ---

    // Sample source
    info!(source = %cfg.sample_source, "Sample source starting");
    let source = cfg.sample_source.clone();
    tokio::spawn(async move { source.run(sample_tx).await });

    // Aggregator (single owner of the open window)
    let aggregator = Aggregator::new(
        Arc::clone(&hub),
        sample_rx,
        shutdown_rx.clone(),
        Arc::clone(&health),
        cfg.window,
        ABOVE_THRESHOLD_MS,
    );
    let mut aggregator_task = tokio::spawn(aggregator.run());
    info!(window_ms = cfg.window.as_millis() as u64, threshold_ms = ABOVE_THRESHOLD_MS, "Aggregator running");

    // HTTP + viewer WebSocket server
    let api_state = ApiState {
        hub: Arc::clone(&hub),
        health,
        fanout,
        window: cfg.window,
        shutdown: shutdown_rx.clone(),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.listen_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {bind_addr} (viewers connect to /ws)");

    let mut server_shutdown = shutdown_rx;
    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
        res = &mut aggregator_task => {
            // Only a persistence failure stops the aggregator on its own.
            joined(res, "aggregator")?;
            return Err(AppError::Task("aggregator stopped unexpectedly".to_string()));
        }
        res = &mut server_task => {
            joined(res.map(|served| served.map_err(AppError::from)), "server")?;
            return Err(AppError::Task("server stopped unexpectedly".to_string()));
        }
    }

    // --- Shutdown: stop sampling, close viewers, drain the server ---
    let _ = shutdown_tx.send(true);
    joined(aggregator_task.await, "aggregator")?;

    let closed = hub.close_viewers();
    info!(viewers = closed, "Closed viewer sessions");

    match tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), server_task).await {
        Ok(res) => joined(res.map(|served| served.map_err(AppError::from)), "server")?,
        Err(_) => warn!("Server did not drain within {SHUTDOWN_GRACE_SECS}s, exiting anyway"),
    }

    info!("Shutdown complete");
    Ok(())
}

fn joined(res: std::result::Result<Result<()>, JoinError>, task: &str) -> Result<()> {
    res.map_err(|e| AppError::Task(format!("{task} task failed: {e}")))?
}
