//! Shared application state for the Observer API server.
//!
//! [`AppState`] holds the orchestrator every endpoint talks to and the
//! optional [`AgentSpawner`] used by `POST /api/agents`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use society_core::bus::EventBus;
use society_core::decision::Agent;
use society_core::orchestrator::Orchestrator;

/// Request body for `POST /api/agents`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SpawnRequest {
    /// Identifier for the new agent.
    pub id: String,
    /// Agent flavour understood by the spawner (e.g. `wander`, `nats`).
    #[serde(default)]
    pub kind: Option<String>,
}

/// Why a spawner refused a request.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SpawnError {
    /// Human-readable reason.
    pub message: String,
}

impl SpawnError {
    /// Create a spawn error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Builds agents on behalf of the API.
pub trait AgentSpawner: Send + Sync {
    /// Create the agent described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] for an unknown kind or an invalid id.
    fn spawn(&self, request: &SpawnRequest) -> Result<Arc<dyn Agent>, SpawnError>;
}

/// Shared state for all Axum handlers.
pub struct AppState {
    /// The simulation.
    pub orchestrator: Arc<Orchestrator>,
    /// Agent factory for `POST /api/agents`; spawning is disabled without one.
    pub spawner: Option<Arc<dyn AgentSpawner>>,
    next_stream: AtomicU64,
}

impl AppState {
    /// Create state over `orchestrator` without a spawner.
    pub const fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            spawner: None,
            next_stream: AtomicU64::new(1),
        }
    }

    /// Enable agent spawning through the API.
    #[must_use]
    pub fn with_spawner(mut self, spawner: Arc<dyn AgentSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// The bus events are read from.
    pub fn bus(&self) -> &Arc<EventBus> {
        self.orchestrator.bus()
    }

    /// A fresh observer name for a `WebSocket` stream.
    pub fn next_stream_name(&self) -> String {
        format!("ws-{}", self.next_stream.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("spawner", &self.spawner.is_some())
            .finish_non_exhaustive()
    }
}
