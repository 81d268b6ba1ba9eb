use super::AppState;
use crate::history::InteractionEntry;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct UserHistoryParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct UserHistoryResponse {
    pub user_id: String,
    pub entries: Vec<InteractionEntry>,
    pub total_entries: usize,
}

#[derive(Serialize)]
pub struct ClearHistoryResponse {
    pub message: String,
    pub cleared: bool,
}

pub fn create_history_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/history/:user_id",
            get(get_user_history).delete(clear_user_history),
        )
        .with_state(state)
}

/// GET /history/:user_id?limit=N - most recent interactions, oldest first
async fn get_user_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<UserHistoryParams>,
) -> Json<UserHistoryResponse> {
    let limit = params.limit.unwrap_or(state.default_history_limit);
    let entries = state.hub.user_history(&user_id, limit);
    Json(UserHistoryResponse {
        user_id,
        total_entries: entries.len(),
        entries,
    })
}

/// DELETE /history/:user_id
async fn clear_user_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<ClearHistoryResponse> {
    let cleared = state.hub.clear_user_history(&user_id);
    Json(ClearHistoryResponse {
        message: format!("History cleared for user {}", user_id),
        cleared,
    })
}
