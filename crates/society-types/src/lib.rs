//! Shared type definitions for the Society simulation.
//!
//! This crate is the single source of truth for the data model shared by
//! the core, the observer API and the engine. Types defined here flow
//! downstream to `TypeScript` via `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Agent and event identifiers
//! - [`enums`] -- Event topics and intent kinds
//! - [`structs`] -- Events and world state
//! - [`actions`] -- Intents, action results and interaction outcomes

pub mod actions;
pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use actions::{
    ActionIntent, ActionResult, DialogueTurn, InteractionResult, Target, payload_keys,
};
pub use enums::{EventTopic, IntentKind, UnknownTopic};
pub use ids::{AgentId, EventId};
pub use structs::{
    Event, Payload, WorldState, WorldStatus, event_types, priorities, sources,
};
