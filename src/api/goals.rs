use super::AppState;
use crate::hub::GoalOutcome;
use crate::task::ScheduledTask;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct GoalParams {
    pub goal: String,
}

#[derive(Serialize)]
pub struct PlanResponse {
    pub user_id: String,
    pub goal: String,
    pub tasks: Vec<ScheduledTask>,
    pub total: usize,
}

pub fn create_goal_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/goal/:user_id", post(process_goal))
        .route("/plan/:user_id", post(plan_goal))
        .with_state(state)
}

/// POST /goal/:user_id?goal=... - plan, schedule and dispatch
async fn process_goal(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<GoalParams>,
) -> Json<GoalOutcome> {
    Json(state.hub.process_goal(&user_id, &params.goal).await)
}

/// POST /plan/:user_id?goal=... - plan and schedule without dispatching
async fn plan_goal(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<GoalParams>,
) -> Json<PlanResponse> {
    let tasks = state.hub.plan_and_schedule(&user_id, &params.goal);
    Json(PlanResponse {
        user_id,
        goal: params.goal,
        total: tasks.len(),
        tasks,
    })
}
