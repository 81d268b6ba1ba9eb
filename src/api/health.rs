use super::AppState;
use crate::bus::IngestionStatus;
use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub stored_devices: usize,
    pub publisher_connected: bool,
    pub ingestion: IngestionStatus,
}

pub fn create_health_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let hub = &state.hub;
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        stored_devices: hub.store().len(),
        publisher_connected: hub.dispatcher().publisher().is_connected(),
        ingestion: hub.ingestion_status(),
    })
}
