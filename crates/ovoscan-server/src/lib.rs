//! ovoscan server - HTTP surface over the detection service
//!
//! Wires a [`DetectionService`] into an axum router and runs it until the
//! shutdown token fires. The session sweeper runs alongside the server and
//! stops with it.

pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ovoscan_core::{Config, DetectionService, Detector};

pub use routes::{app_router, AppError};
pub use state::AppState;

/// Serve `state` on an already bound listener until `shutdown` fires
pub async fn run(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let router = app_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")
}

/// Build the service from `config`, bind, and serve until `shutdown` fires
pub async fn serve(
    config: Config,
    detector: Arc<dyn Detector>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let detector_name = detector.name().to_string();
    let service = Arc::new(DetectionService::from_config(&config, detector)?);
    let sweeper = service
        .store()
        .spawn_sweeper(config.store.sweep_interval(), shutdown.child_token());

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(
        address = %listener.local_addr()?,
        detector = %detector_name,
        workers = config.runner.workers,
        "ovoscan listening"
    );

    let state = AppState::new(service, config.server.max_request_bytes);
    let served = run(listener, state, shutdown.clone()).await;

    shutdown.cancel();
    stop_sweeper(sweeper).await;
    info!("ovoscan stopped");
    served
}

/// Wait for the sweeper to exit; returns false if it died abnormally
async fn stop_sweeper(sweeper: JoinHandle<()>) -> bool {
    match sweeper.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Session sweeper did not stop cleanly");
            false
        }
    }
}
