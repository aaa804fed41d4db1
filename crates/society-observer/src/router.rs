//! Axum router construction for the Observer API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for cross-origin dashboard access.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{control, handlers, ws};

/// Build the complete Axum router for the Observer server.
///
/// The router includes:
/// - `GET /ws/events` -- `WebSocket` event stream
/// - `GET /api/status` -- world status
/// - `GET|POST /api/agents` -- list or spawn agents
/// - `DELETE /api/agents/{id}` -- deactivate an agent
/// - `GET /api/events` -- query the event history
/// - `GET /api/ticks/latest` -- latest tick summary
/// - `POST /api/control/{pause,resume,step,speed,reset}` -- control
///
/// CORS is configured to allow any origin for development. In
/// production this should be restricted.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // WebSocket
        .route("/ws/events", get(ws::ws_events))
        // REST API
        .route("/api/status", get(handlers::status))
        .route(
            "/api/agents",
            get(handlers::list_agents).post(handlers::spawn_agent),
        )
        .route("/api/agents/{id}", delete(handlers::remove_agent))
        .route("/api/events", get(handlers::list_events))
        .route("/api/ticks/latest", get(handlers::latest_tick))
        // Control
        .route("/api/control/pause", post(control::pause))
        .route("/api/control/resume", post(control::resume))
        .route("/api/control/step", post(control::step))
        .route("/api/control/speed", post(control::set_speed))
        .route("/api/control/reset", post(control::reset))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
