//! Integration tests for the Observer API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. This validates handler logic and routing
//! without needing a live network connection.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use society_core::bus::{BusConfig, EventBus};
use society_core::clock::{ClockConfig, SimulationClock};
use society_core::decision::{Agent, IdleAgent};
use society_core::orchestrator::{Orchestrator, OrchestratorConfig};
use society_observer::router::build_router;
use society_observer::state::{AgentSpawner, AppState, SpawnError, SpawnRequest};
use tower::ServiceExt;

struct IdleSpawner;

impl AgentSpawner for IdleSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<Arc<dyn Agent>, SpawnError> {
        match request.kind.as_deref() {
            None | Some("idle") => Ok(Arc::new(IdleAgent::new(request.id.as_str()))),
            Some(other) => Err(SpawnError::new(format!("unknown agent kind: {other}"))),
        }
    }
}

fn make_orchestrator() -> Arc<Orchestrator> {
    let (clock, ticks) = SimulationClock::new(ClockConfig::default()).unwrap();
    let bus = Arc::new(EventBus::new(BusConfig::default()));
    Arc::new(Orchestrator::new(
        OrchestratorConfig::default(),
        clock,
        ticks,
        bus,
    ))
}

fn make_test_state() -> Arc<AppState> {
    Arc::new(AppState::new(make_orchestrator()).with_spawner(Arc::new(IdleSpawner)))
}

async fn send(
    state: &Arc<AppState>,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = build_router(Arc::clone(state))
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn status_reports_paused_world_at_tick_zero() {
    let state = make_test_state();
    let (status, json) = send(&state, "GET", "/api/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"]["paused"], true);
    assert_eq!(json["state"]["current_tick"], 0);
    assert_eq!(json["state"]["active_agent_count"], 0);
    assert_eq!(json["running"], false);
    assert!(json["uptime_seconds"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn agents_can_be_spawned_listed_and_removed() {
    let state = make_test_state();

    let (status, json) = send(
        &state,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "id": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["agent_id"], "alice");

    let (status, _) = send(
        &state,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "id": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(
        &state,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "id": "bob", "kind": "idle" })),
    )
    .await;
    let (status, json) = send(&state, "GET", "/api/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
    assert_eq!(json["agents"], serde_json::json!(["alice", "bob"]));

    let (status, _) = send(&state, "DELETE", "/api/agents/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send(&state, "DELETE", "/api/agents/alice", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);
    assert!(json["error"].as_str().unwrap().contains("alice"));
}

#[tokio::test]
async fn spawn_rejects_bad_requests() {
    let state = make_test_state();
    let (status, _) = send(
        &state,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "id": "carol", "kind": "dragon" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &state,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "id": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let without_spawner = Arc::new(AppState::new(make_orchestrator()));
    let (status, _) = send(
        &without_spawner,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "id": "carol" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn step_requires_a_running_loop() {
    let state = make_test_state();

    let (status, _) = send(&state, "POST", "/api/control/step", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&state, "GET", "/api/ticks/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(
        &state,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "id": "alice" })),
    )
    .await;
    state.orchestrator.start().await.unwrap();

    let (status, json) = send(&state, "POST", "/api/control/step", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tick"], 1);
    assert_eq!(json["results"][0]["agent_id"], "alice");
    assert_eq!(json["results"][0]["kind"], "idle");

    let (status, json) = send(&state, "GET", "/api/ticks/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["tick"], 1);

    let (_, json) = send(&state, "GET", "/api/status", None).await;
    assert_eq!(json["state"]["current_tick"], 1);
    assert_eq!(json["running"], true);

    state.orchestrator.shutdown().await;
}

#[tokio::test]
async fn pause_resume_and_speed_update_status() {
    let state = make_test_state();

    let (status, json) = send(&state, "POST", "/api/control/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    let (_, json) = send(&state, "GET", "/api/status", None).await;
    assert_eq!(json["state"]["paused"], false);

    send(&state, "POST", "/api/control/pause", None).await;
    let (_, json) = send(&state, "GET", "/api/status", None).await;
    assert_eq!(json["state"]["paused"], true);

    let (status, json) = send(
        &state,
        "POST",
        "/api/control/speed",
        Some(serde_json::json!({ "multiplier": 50.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["speed"], 10.0);

    let (_, json) = send(
        &state,
        "POST",
        "/api/control/speed",
        Some(serde_json::json!({ "multiplier": 0.05 })),
    )
    .await;
    assert_eq!(json["speed"], 0.1);

    let (status, _) = send(
        &state,
        "POST",
        "/api/control/speed",
        Some(serde_json::json!({ "multiplier": "fast" })),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn events_can_be_queried_by_topic_and_agent() {
    let state = make_test_state();
    for id in ["alice", "bob"] {
        send(
            &state,
            "POST",
            "/api/agents",
            Some(serde_json::json!({ "id": id })),
        )
        .await;
    }
    send(&state, "POST", "/api/control/resume", None).await;

    let (status, json) = send(&state, "GET", "/api/events?topic=system", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 3);
    assert_eq!(json["events"][0]["type"], "agent_joined");
    assert_eq!(json["events"][2]["type"], "resume");

    let (_, json) = send(&state, "GET", "/api/events?topic=system&limit=1", None).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["events"][0]["type"], "resume");

    let (_, json) = send(&state, "GET", "/api/events?topic=interaction", None).await;
    assert_eq!(json["count"], 0);

    let (status, json) = send(&state, "GET", "/api/events?topic=gossip", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);

    let (status, _) = send(&state, "GET", "/api/events?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reset_clears_roster_and_restarts_loop() {
    let state = make_test_state();
    send(
        &state,
        "POST",
        "/api/agents",
        Some(serde_json::json!({ "id": "alice" })),
    )
    .await;
    state.orchestrator.start().await.unwrap();
    send(&state, "POST", "/api/control/step", None).await;
    send(&state, "POST", "/api/control/step", None).await;

    let (status, json) = send(&state, "POST", "/api/control/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"]["current_tick"], 0);
    assert_eq!(json["state"]["active_agent_count"], 0);
    assert_eq!(json["running"], true);

    let (_, json) = send(&state, "GET", "/api/agents", None).await;
    assert_eq!(json["count"], 0);
    let (status, _) = send(&state, "GET", "/api/ticks/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = send(&state, "POST", "/api/control/step", None).await;
    assert_eq!(json["tick"], 1);

    state.orchestrator.shutdown().await;
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let state = make_test_state();
    let (status, _) = send(&state, "GET", "/api/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
