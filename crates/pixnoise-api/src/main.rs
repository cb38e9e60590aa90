//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use pixnoise_api::{create_router, init_tracing, metrics, ApiConfig, AppState, TaskSweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting pixnoise-api");

    let config = ApiConfig::from_env();
    info!(
        "API config: host={}, port={}, temp_dir={}, image_workers={}, video_workers={}",
        config.host,
        config.port,
        config.temp_dir.display(),
        config.image_max_workers,
        config.video_max_workers
    );

    let state = AppState::new(config.clone());

    // Must exist before the first request
    state
        .prepare_temp_dir()
        .await
        .with_context(|| format!("Failed to create {}", config.temp_dir.display()))?;

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let sweeper = TaskSweeper::new(
        Arc::clone(&state.tasks),
        config.task_retention,
        config.sweep_interval,
    );
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let app = create_router(state.clone(), metrics_handle);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!(
        "Waiting up to {:?} for running videos",
        config.shutdown_timeout
    );
    if !state.drain_video_jobs(config.shutdown_timeout).await {
        warn!("Shutdown timeout reached with videos still running");
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
