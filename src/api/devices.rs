use super::{ApiError, AppState};
use crate::dispatcher::{BatchMode, BatchResult};
use crate::hub::{ControlOutcome, DeviceCommand, DeviceLookupError, DeviceStatus, DeviceSummary};
use crate::preferences::coerce_value;
use crate::task::Task;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Serialize)]
pub struct DeviceListResponse {
    pub devices: BTreeMap<String, DeviceSummary>,
    pub total_devices: usize,
    pub retrieved_at: String,
}

#[derive(Deserialize)]
pub struct SetParameterParams {
    pub parameter: String,
    pub value: String,
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub commands: Vec<DeviceCommand>,
    #[serde(default = "default_execute_parallel")]
    pub execute_parallel: bool,
}

fn default_execute_parallel() -> bool {
    true
}

pub fn create_device_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/control", post(control_device))
        .route("/devices/batch", post(batch_control))
        .route("/devices/:device_id", get(device_status))
        .route("/devices/:device_id/toggle", post(toggle_device))
        .route("/devices/:device_id/set", post(set_parameter))
        .with_state(state)
}

/// GET /devices - every device with a known state
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<DeviceListResponse> {
    let devices: BTreeMap<String, DeviceSummary> = state
        .hub
        .list_devices()
        .into_iter()
        .map(|device| (device.device_id.clone(), device))
        .collect();

    Json(DeviceListResponse {
        total_devices: devices.len(),
        devices,
        retrieved_at: Utc::now().to_rfc3339(),
    })
}

/// GET /devices/:device_id - `device_id` must be `type.name`
async fn device_status(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceStatus>, ApiError> {
    state
        .hub
        .device_status(&device_id)
        .map(Json)
        .map_err(|e| match e {
            DeviceLookupError::InvalidId(e) => ApiError::BadRequest(e.to_string()),
            DeviceLookupError::NotFound(id) => {
                ApiError::NotFound(format!("Device {} not found", id))
            }
        })
}

/// POST /devices/control - direct command, bypassing the planner
async fn control_device(
    State(state): State<Arc<AppState>>,
    Json(command): Json<DeviceCommand>,
) -> Json<ControlOutcome> {
    Json(state.hub.control_device(command).await)
}

/// POST /devices/:device_id/toggle
async fn toggle_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Json<ControlOutcome> {
    Json(state.hub.toggle_device(&device_id).await)
}

/// POST /devices/:device_id/set?parameter=...&value=...
async fn set_parameter(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(params): Query<SetParameterParams>,
) -> Json<ControlOutcome> {
    let value = coerce_value(&params.value);
    Json(
        state
            .hub
            .set_device_parameter(&device_id, &params.parameter, value)
            .await,
    )
}

/// POST /devices/batch
async fn batch_control(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Json<BatchResult> {
    let mode = if request.execute_parallel {
        BatchMode::Parallel
    } else {
        BatchMode::Sequential
    };
    let tasks: Vec<Task> = request
        .commands
        .into_iter()
        .map(DeviceCommand::into_task)
        .collect();

    Json(state.hub.dispatch_batch(&tasks, mode).await)
}
