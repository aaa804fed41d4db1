//! Enumeration types for the Society simulation.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Event topics
// ---------------------------------------------------------------------------

/// Routing key of an event on the bus.
///
/// The audience listed per variant is a convention for publishers; routing
/// itself only looks at topic, subscriber scope and filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EventTopic {
    /// World-wide happenings. Audience: all agents.
    Global,
    /// Conversations between agents. Audience: participants and dashboard.
    Interaction,
    /// Emotional state changes. Audience: dashboard and nearby agents.
    MoodChange,
    /// Goal progress. Audience: dashboard.
    GoalUpdate,
    /// Memory formation and consolidation. Audience: dashboard and analytics.
    Memory,
    /// Relationship score changes. Audience: dashboard and participants.
    Relationship,
    /// Simulation control and lifecycle. Audience: all agents and dashboard.
    System,
}

impl EventTopic {
    /// Every topic, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Global,
        Self::Interaction,
        Self::MoodChange,
        Self::GoalUpdate,
        Self::Memory,
        Self::Relationship,
        Self::System,
    ];

    /// Wire name of the topic.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Interaction => "interaction",
            Self::MoodChange => "mood_change",
            Self::GoalUpdate => "goal_update",
            Self::Memory => "memory",
            Self::Relationship => "relationship",
            Self::System => "system",
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known [`EventTopic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTopic(pub String);

impl fmt::Display for UnknownTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event topic: {}", self.0)
    }
}

impl std::error::Error for UnknownTopic {}

impl FromStr for EventTopic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

/// What an agent intends to do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum IntentKind {
    /// Do nothing.
    Idle,
    /// Relocate; never conflicts.
    Move,
    /// Start an interaction with another agent.
    Interact,
    /// Take exclusive use of a shared resource for this tick.
    Claim,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Move => "move",
            Self::Interact => "interact",
            Self::Claim => "claim",
        };
        f.write_str(name)
    }
}
