//! Core entity structs: events and world state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::EventTopic;
use crate::ids::{AgentId, EventId};

/// Free-form key/value payload attached to events and intents.
pub type Payload = BTreeMap<String, serde_json::Value>;

/// Well-known values for [`Event::source`].
pub mod sources {
    /// Events produced by the simulation itself.
    pub const SYSTEM: &str = "system";
    /// Events produced by an operator through the dashboard API.
    pub const API: &str = "api";
}

/// Priority levels for [`Event::priority`]. Larger values dispatch first.
pub mod priorities {
    /// Default priority for agent-driven events.
    pub const NORMAL: u32 = 0;
    /// Elevated priority, e.g. world-wide happenings.
    pub const ELEVATED: u32 = 1;
    /// Simulation control and lifecycle events.
    pub const SYSTEM: u32 = 10;
}

/// Event type vocabulary, grouped by topic.
pub mod event_types {
    /// A disaster affecting the world.
    pub const DISASTER: &str = "disaster";
    /// A celebration.
    pub const CELEBRATION: &str = "celebration";
    /// Something new was found.
    pub const DISCOVERY: &str = "discovery";
    /// The weather changed.
    pub const WEATHER_CHANGE: &str = "weather_change";

    /// Two agents talked.
    pub const CONVERSATION: &str = "conversation";
    /// An interaction request was turned down.
    pub const INTERACTION_DENIED: &str = "interaction_denied";
    /// A shared resource was claimed.
    pub const RESOURCE_CLAIMED: &str = "resource_claimed";

    /// An agent's emotional state changed.
    pub const MOOD_CHANGED: &str = "mood_changed";
    /// Periodic decay of emotional intensity.
    pub const MOOD_DECAY: &str = "mood_decay";
    /// The relationship score between two agents changed.
    pub const RELATIONSHIP_CHANGED: &str = "relationship_changed";
    /// Periodic memory consolidation window.
    pub const MEMORY_CONSOLIDATION: &str = "memory_consolidation";

    /// The simulation was paused.
    pub const PAUSE: &str = "pause";
    /// The simulation was resumed.
    pub const RESUME: &str = "resume";
    /// The speed multiplier changed.
    pub const SPEED_CHANGED: &str = "speed_changed";
    /// An agent was registered.
    pub const AGENT_JOINED: &str = "agent_joined";
    /// An agent was deactivated.
    pub const AGENT_LEFT: &str = "agent_left";
    /// The simulation was reset to its initial state.
    pub const RESET: &str = "reset";
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable notification published on the event bus.
///
/// An empty `affected_agents` set means the event is a broadcast: every
/// subscriber of the topic receives it. A non-empty set restricts delivery
/// for agent-scoped subscribers to those agents; observer-scoped subscribers
/// (dashboard, persistence) always receive it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Routing topic.
    pub topic: EventTopic,
    /// Topic-specific type, e.g. `conversation`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// An agent id, [`sources::SYSTEM`] or [`sources::API`].
    pub source: String,
    /// Agents this event concerns; empty for a broadcast.
    pub affected_agents: BTreeSet<AgentId>,
    /// Type-specific data.
    pub payload: Payload,
    /// Simulated time of the tick that produced the event.
    pub timestamp: DateTime<Utc>,
    /// Tick that produced the event.
    pub tick: u64,
    /// Dispatch priority, higher first.
    pub priority: u32,
}

impl Event {
    /// Create a broadcast event with normal priority and an empty payload.
    pub fn new(
        topic: EventTopic,
        event_type: impl Into<String>,
        source: impl Into<String>,
        tick: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            topic,
            event_type: event_type.into(),
            source: source.into(),
            affected_agents: BTreeSet::new(),
            payload: Payload::new(),
            timestamp,
            tick,
            priority: priorities::NORMAL,
        }
    }

    /// Restrict the event to the given agents.
    #[must_use]
    pub fn affecting(mut self, agents: impl IntoIterator<Item = AgentId>) -> Self {
        self.affected_agents.extend(agents);
        self
    }

    /// Attach a payload entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Override the dispatch priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the event is a broadcast (no affected agents).
    pub fn is_broadcast(&self) -> bool {
        self.affected_agents.is_empty()
    }

    /// Whether an agent-scoped subscriber for `agent` should see this event.
    pub fn concerns(&self, agent: &AgentId) -> bool {
        self.is_broadcast() || self.affected_agents.contains(agent)
    }
}

// ---------------------------------------------------------------------------
// World state
// ---------------------------------------------------------------------------

/// The single mutable world record owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldState {
    /// Whether the clock is paused.
    pub paused: bool,
    /// Last fully processed tick.
    pub current_tick: u64,
    /// Speed multiplier in `[0.1, 10.0]`.
    pub speed: f64,
    /// Number of registered agents.
    pub active_agent_count: u32,
    /// Wall-clock instant the world was created or last reset.
    pub started_at: DateTime<Utc>,
}

impl WorldState {
    /// A fresh world at tick 0.
    pub const fn initial(paused: bool, speed: f64, started_at: DateTime<Utc>) -> Self {
        Self {
            paused,
            current_tick: 0,
            speed,
            active_agent_count: 0,
            started_at,
        }
    }
}

/// World state plus derived values, as reported to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorldStatus {
    /// Current world state.
    pub state: WorldState,
    /// Whether the tick loop is running.
    pub running: bool,
    /// Tick most recently emitted by the clock.
    pub clock_tick: u64,
    /// Seconds elapsed since `started_at`.
    pub uptime_seconds: i64,
}
