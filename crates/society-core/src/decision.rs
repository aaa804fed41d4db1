//! The agent contract and bundled implementations.
//!
//! During the decision phase of a tick the orchestrator presents each active
//! agent with an [`AgentContext`] and awaits an [`ActionIntent`] in response.
//! The [`Agent`] trait abstracts how that decision is made -- an LLM-backed
//! runner, a remote process, a scripted bot, or a test stub.
//!
//! Decisions run concurrently under a per-agent deadline. The returned
//! future is dropped when the deadline passes or the tick loop stops, and
//! the cancellation token is triggered so work the agent spawned can wind
//! down too.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use society_types::{ActionIntent, AgentId};
use tokio_util::sync::CancellationToken;

use crate::context::AgentContext;

/// Errors an agent can return from a decision.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// The agent did not respond within the deadline.
    #[error("agent {agent_id} timed out (deadline: {deadline_ms}ms)")]
    Timeout {
        /// The agent that timed out.
        agent_id: AgentId,
        /// The deadline in milliseconds.
        deadline_ms: u64,
    },

    /// The decision was abandoned because the tick loop is stopping.
    #[error("decision for agent {agent_id} was cancelled")]
    Cancelled {
        /// The agent whose decision was cancelled.
        agent_id: AgentId,
    },

    /// An error inside the agent or its backend.
    #[error("decision source error: {message}")]
    Internal {
        /// Description of the error.
        message: String,
    },
}

/// A participant in the simulation.
///
/// Implementations must be cheap to call concurrently; the orchestrator
/// calls [`decide`](Agent::decide) on every active agent each tick.
pub trait Agent: Send + Sync {
    /// The agent's identifier. Must not change over the agent's lifetime.
    fn id(&self) -> &AgentId;

    /// Decide what to do this tick.
    ///
    /// The context is a read-only snapshot. Implementations should return
    /// promptly once `cancel` fires.
    fn decide(
        &self,
        context: Arc<AgentContext>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ActionIntent, DecisionError>>;

    /// Opaque state to store with periodic checkpoints.
    fn snapshot(&self) -> Option<serde_json::Value> {
        None
    }
}

/// An agent that never does anything.
#[derive(Debug, Clone)]
pub struct IdleAgent {
    id: AgentId,
}

impl IdleAgent {
    /// Create an idle agent.
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self { id: id.into() }
    }
}

impl Agent for IdleAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn decide(
        &self,
        _context: Arc<AgentContext>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ActionIntent, DecisionError>> {
        futures::future::ready(Ok(ActionIntent::idle(self.id.clone()))).boxed()
    }
}

/// An agent that plays back intents keyed by tick and idles otherwise.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    id: AgentId,
    script: BTreeMap<u64, ActionIntent>,
}

impl ScriptedAgent {
    /// Create an agent with an empty script.
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            script: BTreeMap::new(),
        }
    }

    /// Play `intent` on `tick`. The intent's agent id is overwritten with
    /// this agent's id.
    #[must_use]
    pub fn on_tick(mut self, tick: u64, mut intent: ActionIntent) -> Self {
        intent.agent_id = self.id.clone();
        self.script.insert(tick, intent);
        self
    }
}

impl Agent for ScriptedAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn decide(
        &self,
        context: Arc<AgentContext>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ActionIntent, DecisionError>> {
        let intent = self
            .script
            .get(&context.tick.tick)
            .cloned()
            .unwrap_or_else(|| ActionIntent::idle(self.id.clone()));
        futures::future::ready(Ok(intent)).boxed()
    }

    fn snapshot(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "scripted_ticks": self.script.len() }))
    }
}
