//! NATS-backed agents for the engine.
//!
//! [`NatsAgent`] forwards each decision to an external runner over NATS
//! request/reply and parses the reply as an [`ActionIntent`].
//!
//! # Subject Convention
//!
//! - **Decision request:** `society.decide.{agent_id}` carrying the JSON
//!   [`AgentContext`]
//! - **Reply:** a JSON [`ActionIntent`] on the request's inbox
//!
//! The orchestrator's deadline bounds each request. Dropping the future on
//! timeout or cancellation abandons the request; a late reply is
//! discarded by the client.

use std::sync::Arc;

use futures::future::BoxFuture;
use society_core::context::AgentContext;
use society_core::decision::{Agent, DecisionError};
use society_types::{ActionIntent, AgentId};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Subject prefix decision requests are published under.
pub const DECISION_SUBJECT_PREFIX: &str = "society.decide";

/// An agent whose decisions are made by an external runner.
pub struct NatsAgent {
    id: AgentId,
    client: async_nats::Client,
}

impl NatsAgent {
    /// Create an agent that asks the runner behind `client`.
    pub const fn new(id: AgentId, client: async_nats::Client) -> Self {
        Self { id, client }
    }

    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionError::Internal`] if the connection fails.
    pub async fn connect(url: &str) -> Result<async_nats::Client, DecisionError> {
        async_nats::connect(url)
            .await
            .map_err(|e| DecisionError::Internal {
                message: format!("failed to connect to NATS at {url}: {e}"),
            })
    }

    async fn request(&self, context: Arc<AgentContext>) -> Result<ActionIntent, DecisionError> {
        let subject = decision_subject(&self.id);
        let payload = serde_json::to_vec(context.as_ref()).map_err(|e| DecisionError::Internal {
            message: format!("failed to serialize context for agent {}: {e}", self.id),
        })?;

        let reply = self
            .client
            .request(subject.clone(), payload.into())
            .await
            .map_err(|e| DecisionError::Internal {
                message: format!("request on {subject} failed: {e}"),
            })?;

        let intent = parse_reply(&self.id, &reply.payload)?;
        debug!(
            tick = context.tick.tick,
            agent_id = %self.id,
            kind = %intent.kind,
            "Received intent from runner"
        );
        Ok(intent)
    }
}

impl Agent for NatsAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn decide(
        &self,
        context: Arc<AgentContext>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ActionIntent, DecisionError>> {
        Box::pin(async move {
            tokio::select! {
                () = cancel.cancelled() => Err(DecisionError::Cancelled {
                    agent_id: self.id.clone(),
                }),
                intent = self.request(context) => intent,
            }
        })
    }
}

impl std::fmt::Debug for NatsAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsAgent")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// The subject decisions for `agent` are requested on.
pub fn decision_subject(agent: &AgentId) -> String {
    format!("{DECISION_SUBJECT_PREFIX}.{agent}")
}

/// Parse a runner reply, forcing the intent onto `agent`.
fn parse_reply(agent: &AgentId, payload: &[u8]) -> Result<ActionIntent, DecisionError> {
    let mut intent: ActionIntent =
        serde_json::from_slice(payload).map_err(|e| DecisionError::Internal {
            message: format!("invalid intent from runner for agent {agent}: {e}"),
        })?;
    intent.agent_id = agent.clone();
    Ok(intent)
}
