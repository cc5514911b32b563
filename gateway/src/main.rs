use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use std::sync::Arc;
use telemetry_gateway::config::{Settings, StoreBackend};
use telemetry_gateway::store::{make_pool, FeedStore, MemoryFeedStore, PgFeedStore};
use telemetry_gateway::{metrics, rest, Gateway};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting telemetry gateway");
    info!("HTTP server: {}", settings.http_addr);
    info!(
        "Validation: {:?}, inactive status: {:?}, require key: {}",
        settings.validation, settings.inactive_status, settings.require_key
    );

    metrics::init_metrics().context("Failed to register metrics")?;

    let store: Arc<dyn FeedStore> = match settings.store {
        StoreBackend::Memory => Arc::new(MemoryFeedStore::new()),
        StoreBackend::Postgres => {
            info!("Database: {}", settings.redacted_database_url());
            let pool = make_pool(&settings.database_url)
                .await
                .context("Failed to connect to database")?;
            Arc::new(PgFeedStore::new(pool))
        }
    };
    info!("Feed store backend: {}", store.backend_type());

    let gateway = Arc::new(Gateway::new(store, settings.gate_policy()));

    if let Some(seed) = settings.seed() {
        gateway
            .provision(&seed)
            .await
            .context("Failed to provision app interface")?;
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(gateway));

    let listener = tokio::net::TcpListener::bind(&settings.http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.http_addr))?;

    info!("HTTP server listening on {}", settings.http_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    });

    server.await.context("HTTP server error")?;

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
