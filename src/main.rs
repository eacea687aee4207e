//! Setu - standalone relationship-graph server with a REST API

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use setu::config::ServerConfig;
use setu::edge_graph::EdgeGraphService;
use setu::handlers::{self, AppState};
use setu::ingestion::IngestionClient;
use setu::metrics;
use setu::profiles::ProfileCatalog;
use setu::store::RelationStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    config.log_config();

    if let Err(e) = metrics::register_metrics() {
        tracing::warn!("metrics registration failed: {}", e);
    }

    let store = Arc::new(RelationStore::open(&config.data_dir)?);
    let ingestion = Arc::new(IngestionClient::new(config.ingestion.clone())?);
    let graph = Arc::new(EdgeGraphService::new(
        store.clone(),
        ingestion.clone(),
        config.ingest_statuses.clone(),
    ));
    let state = Arc::new(AppState {
        graph,
        profiles: ProfileCatalog::new(store),
        ingestion,
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Setu listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
