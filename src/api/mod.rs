// HTTP API over the Hub

mod devices;
mod error;
mod executions;
mod goals;
mod health;
mod history;
mod prefs;
mod state;

pub use devices::create_device_router;
pub use error::ApiError;
pub use executions::create_execution_router;
pub use goals::create_goal_router;
pub use health::create_health_router;
pub use history::create_history_router;
pub use prefs::create_prefs_router;
pub use state::create_state_router;

use crate::hub::Hub;
use axum::Router;
use std::sync::Arc;

/// Shared state for every HTTP router
pub struct AppState {
    pub hub: Arc<Hub>,
    /// Page size for `GET /executions` and `GET /history` without `limit`
    pub default_history_limit: usize,
}

impl AppState {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            default_history_limit: 50,
        }
    }
}

/// Combine every router into one application
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(create_goal_router(Arc::clone(&state)))
        .merge(create_state_router(Arc::clone(&state)))
        .merge(create_prefs_router(Arc::clone(&state)))
        .merge(create_device_router(Arc::clone(&state)))
        .merge(create_execution_router(Arc::clone(&state)))
        .merge(create_history_router(Arc::clone(&state)))
        .merge(create_health_router(state))
}
