//! REST API endpoint handlers for the Observer server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/status` | World status |
//! | `GET` | `/api/agents` | Active agent ids |
//! | `POST` | `/api/agents` | Spawn and register an agent |
//! | `DELETE` | `/api/agents/{id}` | Deactivate an agent |
//! | `GET` | `/api/events` | Query the event history |
//! | `GET` | `/api/ticks/latest` | Most recent tick summary |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use society_core::bus::HistoryQuery;
use society_types::{AgentId, Event, EventTopic};

use crate::error::ObserverError;
use crate::state::{AppState, SpawnRequest};

/// Events returned when the request names no limit.
const DEFAULT_EVENT_LIMIT: usize = 100;

/// Upper bound on events per request.
const MAX_EVENT_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Query parameters for the `GET /api/events` endpoint.
#[derive(Debug, serde::Deserialize)]
pub struct EventsQuery {
    /// Only events on this topic (e.g. `interaction`).
    pub topic: Option<String>,
    /// Only events from this tick onwards.
    pub since_tick: Option<u64>,
    /// Only events visible to this agent.
    pub agent: Option<String>,
    /// Maximum number of events to return (default 100, max 1000).
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Return the world state plus whether the loop runs and the uptime.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.status().await)
}

// ---------------------------------------------------------------------------
// /api/agents
// ---------------------------------------------------------------------------

/// List active agent ids in ascending order.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let agents = state.orchestrator.list_agents().await;
    Json(serde_json::json!({
        "count": agents.len(),
        "agents": agents,
    }))
}

/// Spawn an agent through the configured spawner and register it. It takes
/// part from the next tick.
pub async fn spawn_agent(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SpawnRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let spawner = state
        .spawner
        .as_ref()
        .ok_or_else(|| ObserverError::Unavailable("agent spawning is not enabled".to_owned()))?;
    if body.id.trim().is_empty() {
        return Err(ObserverError::InvalidRequest("agent id must not be empty".to_owned()));
    }

    let agent = spawner
        .spawn(&body)
        .map_err(|e| ObserverError::InvalidRequest(e.to_string()))?;
    let agent_id = agent.id().clone();
    state.orchestrator.register_agent(agent).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "agent_id": agent_id,
            "message": "Agent joins from the next tick",
        })),
    ))
}

/// Deactivate an agent. It stops taking part from the next tick.
pub async fn remove_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ObserverError> {
    let agent_id = AgentId::new(id);
    state.orchestrator.deactivate_agent(&agent_id).await?;
    Ok(Json(serde_json::json!({
        "agent_id": agent_id,
        "message": "Agent leaves from the next tick",
    })))
}

// ---------------------------------------------------------------------------
// GET /api/events
// ---------------------------------------------------------------------------

/// Query the event history, oldest first.
///
/// Supports `?topic=`, `?since_tick=`, `?agent=` and `?limit=`; the limit
/// keeps the most recent matches.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let topic = params
        .topic
        .as_deref()
        .map(str::parse::<EventTopic>)
        .transpose()
        .map_err(|e| ObserverError::InvalidRequest(e.to_string()))?;

    let limit = params.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    if limit == 0 || limit > MAX_EVENT_LIMIT {
        return Err(ObserverError::InvalidRequest(format!(
            "limit must be between 1 and {MAX_EVENT_LIMIT}"
        )));
    }

    let query = HistoryQuery {
        topic,
        since_tick: params.since_tick,
        agent: params.agent.map(AgentId::new),
        limit: Some(limit),
    };
    let history = state.bus().history(&query);
    let events: Vec<&Event> = history.iter().map(AsRef::as_ref).collect();

    Ok(Json(serde_json::json!({
        "count": events.len(),
        "events": events,
    })))
}

// ---------------------------------------------------------------------------
// GET /api/ticks/latest
// ---------------------------------------------------------------------------

/// Return the most recently processed tick summary.
pub async fn latest_tick(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let summary = state
        .orchestrator
        .last_summary()
        .ok_or_else(|| ObserverError::NotFound("no tick has been processed yet".to_owned()))?;
    Ok(Json(serde_json::to_value(summary.as_ref())?))
}
