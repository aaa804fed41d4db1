//! Clock, event bus, and orchestration for the Society simulation.
//!
//! This crate owns the tick loop that drives the simulation: the clock emits
//! ticks, the orchestrator asks every agent for an intent, resolves
//! conflicts, publishes the outcome on the event bus, and runs maintenance.
//!
//! # Modules
//!
//! - [`bus`] -- Topic-routed event bus with per-subscriber mailboxes and a
//!   history log.
//! - [`clock`] -- Simulation clock with pause, step, speed, and tick-based
//!   task scheduling.
//! - [`compose`] -- [`DialogueComposer`] trait and [`IntentComposer`].
//! - [`config`] -- Configuration loading from `society-config.yaml` into
//!   strongly-typed structs.
//! - [`conflict`] -- Deterministic conflict resolution.
//! - [`context`] -- Per-agent decision context.
//! - [`decision`] -- [`Agent`] trait and bundled agents.
//! - [`events`] -- Builders for the events the tick loop publishes.
//! - [`orchestrator`] -- The tick loop and control surface.
//! - [`persistence`] -- [`Persistence`] trait, checkpoints, and the event
//!   recorder.
//!
//! [`DialogueComposer`]: compose::DialogueComposer
//! [`IntentComposer`]: compose::IntentComposer
//! [`Agent`]: decision::Agent
//! [`Persistence`]: persistence::Persistence

pub mod bus;
pub mod clock;
pub mod compose;
pub mod config;
pub mod conflict;
pub mod context;
pub mod decision;
pub mod events;
pub mod orchestrator;
pub mod persistence;
mod sync;
