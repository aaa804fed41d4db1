//! Observer API server for the Society simulation.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws/events`) streaming bus events through an
//!   observer-scoped subscription
//! - **REST endpoints** for world status, the agent roster, the event
//!   history and the latest tick summary
//! - **Control endpoints** (`/api/control/*`) mapping one-to-one onto
//!   orchestrator operations: pause, resume, step, speed and reset
//!
//! # Architecture
//!
//! Handlers hold an [`Arc`](std::sync::Arc) to the
//! [`Orchestrator`](society_core::orchestrator::Orchestrator) and its bus.
//! Reads take the orchestrator's world lock only briefly, so the observer
//! never stalls the tick loop.

pub mod control;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ObserverServer, ServerConfig, ServerError};
pub use state::{AgentSpawner, AppState, SpawnError, SpawnRequest};
