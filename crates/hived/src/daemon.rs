//! `hived run`: wire the subsystems together and serve until CTRL+C.
//!
//! Shutdown order: API server stops accepting, the node feed stops, the
//! dispatcher drains in-flight jobs, telemetry stops, and finally the
//! optional metrics export is written.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use hivegrid_core::{ClusterConfig, epoch_secs};
use hivegrid_scheduler::Dispatcher;
use hivegrid_telemetry::{ExportFormat, TelemetryCollector, node_sample};

pub async fn run(
    config: ClusterConfig,
    port: Option<u16>,
    export_on_exit: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!(nodes = config.nodes.len(), "hivegrid daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let telemetry = Arc::new(TelemetryCollector::new(config.monitoring.clone()));
    telemetry.start().await;

    let dispatcher = Arc::new(Dispatcher::new(&config));
    dispatcher.start().await?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Registry → telemetry node samples.
    let feed_handle = tokio::spawn(feed_node_metrics(
        dispatcher.clone(),
        telemetry.clone(),
        config.monitoring.interval,
        config.cluster.health.offline_after,
        shutdown_rx,
    ));

    // ── Start API server ───────────────────────────────────────

    let router = hivegrid_api::build_router(dispatcher.clone(), telemetry.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(config.cluster.api_port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for CTRL+C, shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // ── Drain ──────────────────────────────────────────────────

    let _ = feed_handle.await;
    dispatcher.stop().await?;
    telemetry.stop().await;

    if let Some(path) = export_on_exit {
        let hours = telemetry.config().retention_hours;
        if let Err(e) = telemetry
            .export_metrics(&path, ExportFormat::for_path(&path), hours)
            .await
        {
            warn!(error = %e, "final metrics export failed");
        }
    }

    info!("hivegrid daemon stopped");
    Ok(())
}

/// Record one sample per registered node on every telemetry interval.
async fn feed_node_metrics(
    dispatcher: Arc<Dispatcher>,
    telemetry: Arc<TelemetryCollector>,
    interval: Duration,
    offline_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                record_nodes(&dispatcher, &telemetry, offline_after).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn record_nodes(dispatcher: &Dispatcher, telemetry: &TelemetryCollector, offline_after: Duration) {
    let now = epoch_secs();
    for node in dispatcher.registry().snapshot().await {
        telemetry
            .record_node_metrics(node_sample(&node, now, offline_after.as_secs_f64()))
            .await;
    }
}
