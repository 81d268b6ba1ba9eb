// Integration tests for goal, plan, state, preference and execution endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use homeflux::api::{create_router, AppState};
use homeflux::bus::MemoryBus;
use homeflux::config::HubConfig;
use homeflux::Hub;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app() -> (Router, Arc<Hub>, MemoryBus) {
    let bus = MemoryBus::new();
    let mut config = HubConfig::default();
    config.topics.namespace = "home".to_string();
    let hub = Arc::new(Hub::new(&config, Arc::new(bus.clone())));
    let app = create_router(Arc::new(AppState::new(Arc::clone(&hub))));
    (app, hub, bus)
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// POST /goal runs the whole pipeline and publishes commands in priority order.
#[tokio::test]
async fn test_goodnight_goal() {
    let (app, _hub, bus) = create_test_app();

    let (status, body) = send(&app, "POST", "/goal/john?goal=goodnight").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tasks_planned"], 4);
    assert_eq!(body["tasks_scheduled"], 4);
    assert_eq!(body["tasks_executed"], 4);
    assert_eq!(body["tasks"][0]["device"], "lock.front_door");
    assert_eq!(body["tasks"][0]["priority"], 1);

    let published = bus.published();
    assert_eq!(published[0].topic, "home/lock/front_door/set");
    let payload: Value = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(payload["action"], "lock");
    assert_eq!(payload["value"], true);
    assert_eq!(payload["source"], "homeflux");
    assert!(payload.get("priority").is_none());
}

/// POST /goal without a goal query parameter is rejected.
#[tokio::test]
async fn test_goal_requires_goal_param() {
    let (app, _hub, bus) = create_test_app();

    let (status, _) = send(&app, "POST", "/goal/john").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(bus.published().is_empty());
}

/// POST /plan schedules without dispatching.
#[tokio::test]
async fn test_plan_does_not_dispatch() {
    let (app, hub, bus) = create_test_app();
    hub.store()
        .update("home/light/living_room/state", json!({"state": "on"}));

    let (status, body) = send(&app, "POST", "/plan/john?goal=turn%20the%20light%20on").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert!(bus.published().is_empty());

    let (_, body) = send(&app, "POST", "/plan/john?goal=xyzzy").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["tasks"][0]["reason"], "Unknown goal: xyzzy");
}

/// Preferences set over HTTP are coerced and used by the planner.
#[tokio::test]
async fn test_preferences_round_trip_into_plans() {
    let (app, _hub, _bus) = create_test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/prefs/jane?key=default_temperature&value=23.5",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["preferences"]["default_temperature"], 23.5);

    send(&app, "POST", "/prefs/jane?key=night_mode&value=TRUE").await;
    let (_, body) = send(&app, "GET", "/prefs/jane").await;
    assert_eq!(body["user_id"], "jane");
    assert_eq!(body["preferences"]["night_mode"], true);

    let (_, body) = send(&app, "POST", "/plan/jane?goal=temperature").await;
    assert_eq!(body["tasks"][0]["value"], 23.5);
}

/// GET /state returns the snapshot and GET /state/*key a single entry.
#[tokio::test]
async fn test_state_queries() {
    let (app, hub, _bus) = create_test_app();
    hub.store()
        .update("home/light/kitchen/state", json!({"state": "on", "brightness": 80}));

    let (status, body) = send(&app, "GET", "/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_devices"], 1);
    assert_eq!(body["states"]["home/light/kitchen/state"]["brightness"], 80);
    assert!(body["last_updated"]["home/light/kitchen/state"].is_string());

    let (status, body) = send(&app, "GET", "/state/home/light/kitchen/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["state"], "on");

    let (status, body) = send(&app, "GET", "/state/home/light/attic/state").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("home/light/attic/state"));
}

/// GET /executions pages the history and /executions/stats summarises it.
#[tokio::test]
async fn test_execution_history_and_stats() {
    let (app, _hub, bus) = create_test_app();

    bus.fail_next_publishes(1);
    send(&app, "POST", "/goal/john?goal=movie").await;

    let (status, body) = send(&app, "GET", "/executions?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (_, body) = send(&app, "GET", "/executions").await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["executions"][0]["status"], "failed");
    assert_eq!(body["executions"][1]["status"], "success");

    let (_, stats) = send(&app, "GET", "/executions/stats").await;
    assert_eq!(stats["total_executions"], 3);
    assert_eq!(stats["failed_executions"], 1);
    assert_eq!(stats["connected"], true);
}

/// Goals and preference changes land in the user's history; DELETE clears it.
#[tokio::test]
async fn test_user_history() {
    let (app, _hub, _bus) = create_test_app();

    send(&app, "POST", "/goal/john?goal=goodnight").await;
    send(&app, "POST", "/prefs/john?key=default_brightness&value=40").await;
    send(&app, "POST", "/goal/jane?goal=party").await;

    let (status, body) = send(&app, "GET", "/history/john").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "john");
    assert_eq!(body["total_entries"], 3);
    assert_eq!(body["entries"][0]["type"], "goal_request");
    assert_eq!(body["entries"][0]["data"]["goal"], "goodnight");
    assert_eq!(body["entries"][1]["type"], "goal_execution");
    assert_eq!(body["entries"][1]["data"]["tasks_executed"], 4);
    assert_eq!(body["entries"][1]["data"]["results"][0]["success"], true);
    assert_eq!(body["entries"][2]["type"], "preference_change");
    assert_eq!(body["entries"][2]["data"]["value"], 40);

    let (_, body) = send(&app, "GET", "/history/john?limit=1").await;
    assert_eq!(body["total_entries"], 1);
    assert_eq!(body["entries"][0]["type"], "preference_change");

    let (status, body) = send(&app, "DELETE", "/history/john").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], true);

    let (_, body) = send(&app, "GET", "/history/john").await;
    assert_eq!(body["total_entries"], 0);
    let (_, body) = send(&app, "GET", "/history/jane").await;
    assert_eq!(body["total_entries"], 2);
}

/// GET /health reports component status.
#[tokio::test]
async fn test_health() {
    let (app, _hub, _bus) = create_test_app();

    let (status, body) = send(&app, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["ingestion"]["running"], false);
    assert_eq!(body["ingestion"]["phase"], "disconnected");
    assert_eq!(body["ingestion"]["topic_pattern"], "home/+/+/state");
}
