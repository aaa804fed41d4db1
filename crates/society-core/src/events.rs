//! Builders for the events the tick loop publishes.
//!
//! Interaction outcomes fan out into three topics: the conversation itself
//! on `Interaction`, the relationship change on `Relationship`, and one
//! `MoodChange` per participant. All of them affect both participants so
//! that partners see each other's outcome in their next context.

use serde_json::Value;
use society_types::{
    ActionIntent, ActionResult, AgentId, Event, EventTopic, InteractionResult, event_types,
    priorities, sources,
};

use crate::clock::TickInfo;
use crate::conflict::Pairing;

/// Events describing one admitted interaction.
pub fn interaction_events(
    info: &TickInfo,
    pairing: &Pairing,
    interaction: &InteractionResult,
) -> Vec<Event> {
    let participants = [interaction.agent1_id.clone(), interaction.agent2_id.clone()];
    let mut events = Vec::with_capacity(4);

    events.push(
        Event::new(
            EventTopic::Interaction,
            event_types::CONVERSATION,
            sources::SYSTEM,
            info.tick,
            info.sim_time,
        )
        .affecting(participants.clone())
        .with("initiator", pairing.initiator.as_str())
        .with("partner", pairing.partner.as_str())
        .with("mutual", pairing.mutual)
        .with(
            "dialogue",
            serde_json::to_value(&interaction.dialogue).unwrap_or_default(),
        ),
    );

    events.push(
        Event::new(
            EventTopic::Relationship,
            event_types::RELATIONSHIP_CHANGED,
            sources::SYSTEM,
            info.tick,
            info.sim_time,
        )
        .affecting(participants.clone())
        .with("agent1_id", interaction.agent1_id.as_str())
        .with("agent2_id", interaction.agent2_id.as_str())
        .with("delta", Value::from(interaction.relationship_delta)),
    );

    for (agent, emotion) in &interaction.emotional_impact {
        events.push(
            Event::new(
                EventTopic::MoodChange,
                event_types::MOOD_CHANGED,
                sources::SYSTEM,
                info.tick,
                info.sim_time,
            )
            .affecting(participants.clone())
            .with("agent_id", agent.as_str())
            .with("emotion", emotion.as_str()),
        );
    }

    events
}

/// Event announcing a denied intent to the agent that made it.
pub fn denial_event(info: &TickInfo, result: &ActionResult) -> Event {
    Event::new(
        EventTopic::Interaction,
        event_types::INTERACTION_DENIED,
        sources::SYSTEM,
        info.tick,
        info.sim_time,
    )
    .affecting([result.agent_id.clone()])
    .with("agent_id", result.agent_id.as_str())
    .with("kind", result.kind.to_string())
    .with("reason", result.reason.as_str())
}

/// Broadcast announcing a successful resource claim.
pub fn claim_event(info: &TickInfo, intent: &ActionIntent) -> Event {
    let mut event = Event::new(
        EventTopic::Global,
        event_types::RESOURCE_CLAIMED,
        sources::SYSTEM,
        info.tick,
        info.sim_time,
    )
    .with("agent_id", intent.agent_id.as_str());
    if let Some(resource) = intent.target_resource() {
        event = event.with("resource", resource);
    }
    event
}

/// A broadcast system event at system priority.
pub fn system_event(
    event_type: &str,
    tick: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Event {
    Event::new(
        EventTopic::System,
        event_type,
        sources::SYSTEM,
        tick,
        timestamp,
    )
    .with_priority(priorities::SYSTEM)
}

/// A system event about a single agent joining or leaving.
pub fn membership_event(
    event_type: &str,
    agent: &AgentId,
    tick: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Event {
    system_event(event_type, tick, timestamp).with("agent_id", agent.as_str())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use super::*;

    fn info() -> TickInfo {
        TickInfo {
            tick: 5,
            sim_time: DateTime::<Utc>::UNIX_EPOCH,
            delta: Duration::from_secs(1),
            wall_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn interaction_fans_out_to_three_topics() {
        let pairing = Pairing {
            initiator: AgentId::from("a2"),
            partner: AgentId::from("a1"),
            mutual: false,
        };
        let mut interaction = InteractionResult::neutral(AgentId::from("a1"), AgentId::from("a2"));
        interaction
            .emotional_impact
            .insert(AgentId::from("a1"), "happy".to_owned());
        interaction.relationship_delta = 0.25;

        let events = interaction_events(&info(), &pairing, &interaction);
        let topics: Vec<EventTopic> = events.iter().map(|e| e.topic).collect();
        assert_eq!(
            topics,
            vec![
                EventTopic::Interaction,
                EventTopic::Relationship,
                EventTopic::MoodChange
            ]
        );
        for event in &events {
            assert_eq!(event.tick, 5);
            assert!(event.concerns(&AgentId::from("a1")));
            assert!(event.concerns(&AgentId::from("a2")));
            assert!(!event.concerns(&AgentId::from("a3")));
        }
        let conversation = events.first().unwrap();
        assert_eq!(conversation.payload["initiator"], "a2");
        assert_eq!(conversation.payload["mutual"], false);
    }

    #[test]
    fn system_events_are_broadcast_at_system_priority() {
        let event = membership_event(event_types::AGENT_JOINED, &AgentId::from("a1"), 3, Utc::now());
        assert!(event.is_broadcast());
        assert_eq!(event.priority, priorities::SYSTEM);
        assert_eq!(event.topic, EventTopic::System);
        assert_eq!(event.payload["agent_id"], "a1");
    }

    #[test]
    fn claim_event_names_resource() {
        let intent = ActionIntent::claim(AgentId::from("a1"), "well");
        let event = claim_event(&info(), &intent);
        assert_eq!(event.event_type, event_types::RESOURCE_CLAIMED);
        assert_eq!(event.payload["resource"], "well");
    }
}
