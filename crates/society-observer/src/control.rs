//! Control endpoints for runtime simulation control.
//!
//! Each endpoint maps onto exactly one orchestrator operation.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/control/pause` | Pause the clock |
//! | `POST` | `/api/control/resume` | Resume the clock |
//! | `POST` | `/api/control/step` | Advance one tick while paused |
//! | `POST` | `/api/control/speed` | Set the speed multiplier |
//! | `POST` | `/api/control/reset` | Reset the world and restart the loop |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::info;

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/control/speed`.
#[derive(Debug, serde::Deserialize)]
pub struct SetSpeedRequest {
    /// Requested multiplier; clamped to `[0.1, 10.0]`.
    pub multiplier: f64,
}

/// Generic success response.
#[derive(Debug, serde::Serialize)]
struct ControlResponse {
    /// Whether the operation succeeded.
    ok: bool,
    /// Human-readable message.
    message: String,
}

impl ControlResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: true,
            message: message.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Pause the simulation. Tick numbering is preserved.
pub async fn pause(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.orchestrator.pause().await;
    ControlResponse::ok("Simulation paused")
}

/// Resume the simulation.
pub async fn resume(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.orchestrator.resume().await;
    ControlResponse::ok("Simulation resumed")
}

/// Advance exactly one tick and return its summary.
///
/// Rejected with `409` unless the loop is running and the clock is paused.
pub async fn step(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let summary = state.orchestrator.step().await?;
    Ok(Json(serde_json::to_value(summary.as_ref())?))
}

/// Change the speed multiplier.
pub async fn set_speed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetSpeedRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let applied = state.orchestrator.set_speed(body.multiplier).await?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "requested": body.multiplier,
        "speed": applied,
    })))
}

/// Reset the world to tick 0 with an empty roster and restart the loop.
pub async fn reset(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    state.orchestrator.reset().await;
    state.orchestrator.start().await?;
    info!("World reset through the control API");
    Ok(Json(state.orchestrator.status().await))
}
