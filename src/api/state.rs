use super::{ApiError, AppState};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Serialize)]
pub struct StateResponse {
    pub timestamp: String,
    pub states: BTreeMap<String, Value>,
    pub last_updated: BTreeMap<String, String>,
    pub total_devices: usize,
}

#[derive(Serialize)]
pub struct KeyStateResponse {
    pub key: String,
    pub state: Value,
    pub last_updated: String,
}

pub fn create_state_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/state", get(get_all_state))
        .route("/state/*key", get(get_state))
        .with_state(state)
}

/// GET /state - consistent snapshot of every stored device state
async fn get_all_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    let snapshot = state.hub.query_all_state();
    Json(StateResponse {
        timestamp: Utc::now().to_rfc3339(),
        states: snapshot.entries,
        last_updated: snapshot.timestamps,
        total_devices: snapshot.count,
    })
}

/// GET /state/*key - e.g. /state/home/light/kitchen/state
async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<KeyStateResponse>, ApiError> {
    let device_state = state
        .hub
        .store()
        .get_state(&key)
        .ok_or_else(|| ApiError::NotFound(format!("No state for key '{}'", key)))?;

    Ok(Json(KeyStateResponse {
        key: key.to_lowercase(),
        state: device_state.payload,
        last_updated: device_state.last_updated.to_rfc3339(),
    }))
}
