//! Read-only per-agent context built at the start of every tick.

use serde::Serialize;
use society_types::{AgentId, Event, WorldState};

use crate::clock::TickInfo;

/// Everything an agent is shown when asked to decide.
///
/// Built fresh for each agent each tick; later changes to the world do not
/// show through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentContext {
    /// The agent being asked.
    pub agent_id: AgentId,
    /// Timing of the current tick.
    pub tick: TickInfo,
    /// World state as of the previous tick.
    pub world: WorldState,
    /// Other active agents, ascending.
    pub peers: Vec<AgentId>,
    /// Most recent broadcasts and events affecting this agent, oldest first.
    pub recent_events: Vec<Event>,
}

impl AgentContext {
    /// Whether `agent` is an active peer this tick.
    pub fn has_peer(&self, agent: &AgentId) -> bool {
        self.peers.binary_search(agent).is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use super::*;

    pub(crate) fn context_for(agent: &str, tick: u64) -> AgentContext {
        AgentContext {
            agent_id: AgentId::from(agent),
            tick: TickInfo {
                tick,
                sim_time: DateTime::<Utc>::UNIX_EPOCH,
                delta: Duration::from_secs(1),
                wall_time: DateTime::<Utc>::UNIX_EPOCH,
            },
            world: WorldState::initial(false, 1.0, DateTime::<Utc>::UNIX_EPOCH),
            peers: vec![AgentId::from("a2"), AgentId::from("a3")],
            recent_events: Vec::new(),
        }
    }

    #[test]
    fn peers_are_searchable() {
        let context = context_for("a1", 1);
        assert!(context.has_peer(&AgentId::from("a3")));
        assert!(!context.has_peer(&AgentId::from("a1")));
    }
}
