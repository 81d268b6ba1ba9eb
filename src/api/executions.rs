use super::AppState;
use crate::dispatcher::{DispatchStats, ExecutionRecord};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub executions: Vec<ExecutionRecord>,
    pub total: usize,
}

pub fn create_execution_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/executions", get(list_executions))
        .route("/executions/stats", get(execution_stats))
        .with_state(state)
}

/// GET /executions?limit=N - most recent records, oldest first
async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let limit = params.limit.unwrap_or(state.default_history_limit);
    let executions = state.hub.execution_history(limit);
    Json(HistoryResponse {
        total: executions.len(),
        executions,
    })
}

/// GET /executions/stats
async fn execution_stats(State(state): State<Arc<AppState>>) -> Json<DispatchStats> {
    Json(state.hub.execution_stats())
}
