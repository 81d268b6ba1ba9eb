use anyhow::{Context, Result};
use homeflux::api::{create_router, AppState};
use homeflux::bus::MqttTransport;
use homeflux::config::{load_config_or_default, CONFIG_PATH_ENV};
use homeflux::Hub;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homeflux=info".into()),
        )
        .init();

    info!("HomeFlux starting...");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "homeflux.toml".to_string());
    let config = load_config_or_default(&config_path)?;

    info!(
        config_path = %config_path,
        broker = %config.mqtt.broker(),
        namespace = %config.topics.namespace,
        history_capacity = config.dispatch.history_capacity,
        "Configuration loaded"
    );

    let transport = Arc::new(MqttTransport::new(config.mqtt.clone()));
    let hub = Arc::new(Hub::new(&config, transport));

    let ingestion_handle = hub.start_ingestion();
    info!(topic_pattern = %hub.ingestion().topic_pattern(), "Ingestion started");

    let app_state = Arc::new(AppState {
        hub: Arc::clone(&hub),
        default_history_limit: config.api.default_history_limit,
    });
    let router = create_router(app_state).layer(CorsLayer::permissive());

    let bind_address = config.api.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind API address {}", bind_address))?;
    info!(address = %bind_address, "HTTP API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // Graceful shutdown
    hub.stop_ingestion();
    if tokio::time::timeout(Duration::from_secs(5), ingestion_handle)
        .await
        .is_err()
    {
        warn!("Ingestion loop did not stop in time");
    }
    hub.dispatcher().publisher().disconnect().await;

    info!("HomeFlux stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl_c signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
