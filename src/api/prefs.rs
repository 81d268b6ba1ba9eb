use super::AppState;
use crate::preferences::{PreferenceSource, Preferences};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct SetPreferenceParams {
    pub key: String,
    pub value: String,
}

#[derive(Serialize)]
pub struct PreferenceResponse {
    pub user_id: String,
    pub preferences: Preferences,
}

pub fn create_prefs_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/prefs/:user_id", get(get_preferences).post(set_preference))
        .with_state(state)
}

/// GET /prefs/:user_id
async fn get_preferences(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<PreferenceResponse> {
    let preferences = state.hub.preferences().get_preferences(&user_id);
    Json(PreferenceResponse {
        user_id,
        preferences,
    })
}

/// POST /prefs/:user_id?key=...&value=...
///
/// Values are coerced from their string form: `22.5` is stored as a float,
/// `75` as an integer, `true`/`false` as booleans.
async fn set_preference(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<SetPreferenceParams>,
) -> Json<PreferenceResponse> {
    state
        .hub
        .set_preference(&user_id, &params.key, &params.value);
    Json(PreferenceResponse {
        preferences: state.hub.preferences().get_preferences(&user_id),
        user_id,
    })
}
