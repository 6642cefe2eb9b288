//! Takeoff Server - entry point

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use takeoff_core::{CountDetector, ScaleDetector, Takeoff};
use takeoff_server::{
    detectors::{HttpCountDetector, HttpScaleDetector, UnconfiguredDetector},
    web_api, AppState, ServerConfig,
};
use takeoff_storage::Storage;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "takeoff_server=debug,takeoff_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting takeoff-server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::parse();
    let takeoff_config = config.takeoff_config()?;

    let storage = match &config.data_dir {
        Some(dir) => Storage::with_root(dir),
        None => Storage::from_default_project().context("no data directory available")?,
    };
    let storage = Arc::new(storage);
    let snapshot = storage
        .load_snapshot()
        .with_context(|| format!("failed to load snapshot from {}", storage.root().display()))?;
    tracing::info!(
        data_dir = %storage.root().display(),
        measurements = snapshot.measurements.count(),
        "Snapshot loaded"
    );

    let timeout = takeoff_config.detection_timeout;
    let scale_detector: Arc<dyn ScaleDetector> = match &config.scale_detector_url {
        Some(url) => Arc::new(HttpScaleDetector::new(url, timeout)),
        None => {
            tracing::warn!("No scale detector configured; scale detection will fail");
            Arc::new(UnconfiguredDetector)
        }
    };
    let count_detector: Arc<dyn CountDetector> = match &config.count_detector_url {
        Some(url) => Arc::new(HttpCountDetector::new(url, timeout)),
        None => {
            tracing::warn!("No count detector configured; auto-count will fail");
            Arc::new(UnconfiguredDetector)
        }
    };

    let state = AppState::new(
        Takeoff::from_snapshot(snapshot, takeoff_config),
        scale_detector,
        count_detector,
        storage.clone(),
    )
    .with_storage(storage);

    let app = web_api::create_router(state).layer(TraceLayer::new_for_http());

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
