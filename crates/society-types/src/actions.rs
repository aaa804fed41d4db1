//! Intent and result types exchanged between agents and the orchestrator.
//!
//! An [`ActionIntent`] is what an agent proposes for one tick. Conflict
//! resolution turns every intent into exactly one [`ActionResult`]; admitted
//! interactions additionally carry an [`InteractionResult`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::IntentKind;
use crate::ids::AgentId;
use crate::structs::Payload;

/// Payload keys agents use to steer dialogue composition.
pub mod payload_keys {
    /// What the agent wants to say.
    pub const UTTERANCE: &str = "utterance";
    /// The emotion the agent expresses.
    pub const EMOTION: &str = "emotion";
    /// How the agent feels about the partner, in `[-1, 1]`.
    pub const SENTIMENT: &str = "sentiment";
    /// Destination of a move intent.
    pub const DESTINATION: &str = "destination";
}

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

/// What an intent is directed at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Target {
    /// Another agent.
    Agent(AgentId),
    /// A shared resource, identified by key.
    Resource(String),
}

/// An agent's proposed action for the current tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActionIntent {
    /// The proposing agent.
    pub agent_id: AgentId,
    /// What kind of action.
    pub kind: IntentKind,
    /// What the action is directed at, if anything.
    pub target: Option<Target>,
    /// Free-form details (utterance, destination, ...).
    pub payload: Payload,
}

impl ActionIntent {
    /// An idle intent.
    pub fn idle(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            kind: IntentKind::Idle,
            target: None,
            payload: Payload::new(),
        }
    }

    /// An intent to interact with `partner`.
    pub fn interact(agent_id: AgentId, partner: AgentId) -> Self {
        Self {
            agent_id,
            kind: IntentKind::Interact,
            target: Some(Target::Agent(partner)),
            payload: Payload::new(),
        }
    }

    /// An intent to claim the shared resource `key`.
    pub fn claim(agent_id: AgentId, key: impl Into<String>) -> Self {
        Self {
            agent_id,
            kind: IntentKind::Claim,
            target: Some(Target::Resource(key.into())),
            payload: Payload::new(),
        }
    }

    /// An intent to move to `destination`.
    pub fn move_to(agent_id: AgentId, destination: impl Into<String>) -> Self {
        let mut payload = Payload::new();
        payload.insert(
            payload_keys::DESTINATION.to_owned(),
            serde_json::Value::String(destination.into()),
        );
        Self {
            agent_id,
            kind: IntentKind::Move,
            target: None,
            payload,
        }
    }

    /// Attach a payload entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// The targeted agent, if this intent targets one.
    pub const fn target_agent(&self) -> Option<&AgentId> {
        match &self.target {
            Some(Target::Agent(id)) => Some(id),
            _ => None,
        }
    }

    /// The targeted resource key, if this intent targets one.
    pub fn target_resource(&self) -> Option<&str> {
        match &self.target {
            Some(Target::Resource(key)) => Some(key.as_str()),
            _ => None,
        }
    }

    /// A string payload value.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(serde_json::Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One line of dialogue within an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DialogueTurn {
    /// Who spoke.
    pub speaker_id: AgentId,
    /// What was said.
    pub content: String,
    /// Emotion expressed with the line.
    pub emotion: String,
    /// Simulated time of the line.
    pub timestamp: DateTime<Utc>,
}

/// The shared outcome of an admitted interaction.
///
/// `agent1_id` is always the lexicographically smaller participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct InteractionResult {
    /// Smaller participant id.
    pub agent1_id: AgentId,
    /// Larger participant id.
    pub agent2_id: AgentId,
    /// The conversation.
    pub dialogue: Vec<DialogueTurn>,
    /// Relationship score change in `[-1, 1]`.
    pub relationship_delta: f64,
    /// Resulting emotion per participant.
    pub emotional_impact: BTreeMap<AgentId, String>,
}

impl InteractionResult {
    /// An interaction with no dialogue and no effect, used as a fallback.
    pub fn neutral(a: AgentId, b: AgentId) -> Self {
        let (agent1_id, agent2_id) = if a <= b { (a, b) } else { (b, a) };
        Self {
            agent1_id,
            agent2_id,
            dialogue: Vec::new(),
            relationship_delta: 0.0,
            emotional_impact: BTreeMap::new(),
        }
    }

    /// Both participants, smaller id first.
    pub const fn participants(&self) -> [&AgentId; 2] {
        [&self.agent1_id, &self.agent2_id]
    }
}

/// The outcome of one intent after conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActionResult {
    /// The agent whose intent this resolves.
    pub agent_id: AgentId,
    /// Kind of the resolved intent.
    pub kind: IntentKind,
    /// Whether the intent was admitted.
    pub success: bool,
    /// Human-readable explanation.
    pub reason: String,
    /// The interaction, when this result admitted one.
    pub interaction: Option<InteractionResult>,
}

impl ActionResult {
    /// A successful result for `agent`'s intent of `kind`.
    pub fn admitted(agent: AgentId, kind: IntentKind, reason: impl Into<String>) -> Self {
        Self {
            agent_id: agent,
            kind,
            success: true,
            reason: reason.into(),
            interaction: None,
        }
    }

    /// A denied result for `agent`'s intent of `kind`.
    pub fn denied(agent: AgentId, kind: IntentKind, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::admitted(agent, kind, reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_interaction_orders_participants() {
        let result = InteractionResult::neutral(AgentId::from("b"), AgentId::from("a"));
        assert_eq!(result.agent1_id.as_str(), "a");
        assert_eq!(result.agent2_id.as_str(), "b");
        assert!(result.dialogue.is_empty());
    }

    #[test]
    fn intent_accessors() {
        let talk = ActionIntent::interact("a".into(), "b".into()).with(payload_keys::UTTERANCE, "hi");
        assert_eq!(talk.target_agent().map(AgentId::as_str), Some("b"));
        assert_eq!(talk.target_resource(), None);
        assert_eq!(talk.payload_str(payload_keys::UTTERANCE), Some("hi"));

        let claim = ActionIntent::claim("a".into(), "well");
        assert_eq!(claim.target_resource(), Some("well"));
        assert!(claim.target_agent().is_none());
    }

    #[test]
    fn denied_result_differs_only_in_success() {
        let ok = ActionResult::admitted("a".into(), IntentKind::Claim, "resource claimed");
        let no = ActionResult::denied("a".into(), IntentKind::Claim, "resource claimed");
        assert!(ok.success);
        assert!(!no.success);
        assert_eq!(ok.agent_id, no.agent_id);
        assert_eq!(no.kind, IntentKind::Claim);
        assert!(no.interaction.is_none());
    }
}
