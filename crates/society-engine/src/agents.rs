//! Local agents that decide without an external runner.
//!
//! [`WanderingAgent`] rolls seeded dice every tick: sometimes it strikes up
//! a conversation with a random peer, sometimes it claims a resource, and
//! otherwise it wanders between destinations or idles. Two agents built
//! with the same seed make the same choices given the same contexts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use society_core::context::AgentContext;
use society_core::decision::{Agent, DecisionError};
use society_types::{ActionIntent, AgentId, payload_keys};
use tokio_util::sync::CancellationToken;

/// Lines a wandering agent may open a conversation with.
const GREETINGS: &[&str] = &[
    "Hello there.",
    "Fine weather today.",
    "Have you seen the orchard?",
    "I could use a hand later.",
    "Did you hear the news?",
];

/// Emotions a wandering agent may express.
const EMOTIONS: &[&str] = &["happy", "curious", "calm", "anxious", "neutral"];

/// Tuning for [`WanderingAgent`], read from the `agents.wander` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WanderConfig {
    /// Probability of starting an interaction on a tick.
    #[serde(default = "default_interact_chance")]
    pub interact_chance: f64,

    /// Probability of claiming a resource when not interacting.
    #[serde(default = "default_claim_chance")]
    pub claim_chance: f64,

    /// Probability of moving when neither interacting nor claiming.
    #[serde(default = "default_move_chance")]
    pub move_chance: f64,

    /// Resources that can be claimed.
    #[serde(default = "default_resources")]
    pub resources: Vec<String>,

    /// Places agents wander between.
    #[serde(default = "default_destinations")]
    pub destinations: Vec<String>,
}

impl Default for WanderConfig {
    fn default() -> Self {
        Self {
            interact_chance: default_interact_chance(),
            claim_chance: default_claim_chance(),
            move_chance: default_move_chance(),
            resources: default_resources(),
            destinations: default_destinations(),
        }
    }
}

const fn default_interact_chance() -> f64 {
    0.3
}

const fn default_claim_chance() -> f64 {
    0.1
}

const fn default_move_chance() -> f64 {
    0.5
}

fn default_resources() -> Vec<String> {
    vec![
        String::from("well"),
        String::from("orchard"),
        String::from("workshop"),
    ]
}

fn default_destinations() -> Vec<String> {
    vec![
        String::from("square"),
        String::from("market"),
        String::from("riverbank"),
        String::from("library"),
    ]
}

/// A seeded random agent.
pub struct WanderingAgent {
    id: AgentId,
    config: Arc<WanderConfig>,
    rng: Mutex<StdRng>,
    decisions: AtomicU64,
}

impl WanderingAgent {
    /// Create an agent whose choices are driven by `seed`.
    pub fn new(id: AgentId, config: Arc<WanderConfig>, seed: u64) -> Self {
        Self {
            id,
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            decisions: AtomicU64::new(0),
        }
    }

    fn roll(&self, context: &AgentContext) -> ActionIntent {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let config = &self.config;

        if rng.random_bool(probability(config.interact_chance)) {
            if let Some(partner) = context.peers.choose(&mut *rng) {
                let mut intent = ActionIntent::interact(self.id.clone(), partner.clone())
                    .with(payload_keys::SENTIMENT, rng.random_range(-0.5_f64..=1.0));
                if let Some(line) = GREETINGS.choose(&mut *rng) {
                    intent = intent.with(payload_keys::UTTERANCE, *line);
                }
                if let Some(emotion) = EMOTIONS.choose(&mut *rng) {
                    intent = intent.with(payload_keys::EMOTION, *emotion);
                }
                return intent;
            }
        }

        if rng.random_bool(probability(config.claim_chance)) {
            if let Some(resource) = config.resources.choose(&mut *rng) {
                return ActionIntent::claim(self.id.clone(), resource.clone());
            }
        }

        if rng.random_bool(probability(config.move_chance)) {
            if let Some(destination) = config.destinations.choose(&mut *rng) {
                return ActionIntent::move_to(self.id.clone(), destination.clone());
            }
        }

        ActionIntent::idle(self.id.clone())
    }
}

impl Agent for WanderingAgent {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn decide(
        &self,
        context: Arc<AgentContext>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ActionIntent, DecisionError>> {
        let intent = self.roll(&context);
        self.decisions.fetch_add(1, Ordering::Relaxed);
        futures::future::ready(Ok(intent)).boxed()
    }

    fn snapshot(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "kind": "wander",
            "decisions": self.decisions.load(Ordering::Relaxed),
        }))
    }
}

impl std::fmt::Debug for WanderingAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WanderingAgent")
            .field("id", &self.id)
            .field("decisions", &self.decisions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clamp a configured chance into `[0, 1]`; anything non-finite is 0.
fn probability(p: f64) -> f64 {
    if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use society_core::clock::TickInfo;
    use society_types::{IntentKind, WorldState};

    use super::*;

    fn context(agent: &str, peers: &[&str]) -> Arc<AgentContext> {
        Arc::new(AgentContext {
            agent_id: AgentId::from(agent),
            tick: TickInfo {
                tick: 1,
                sim_time: Utc::now(),
                delta: Duration::from_secs(1),
                wall_time: Utc::now(),
            },
            world: WorldState::initial(false, 1.0, Utc::now()),
            peers: peers.iter().map(|p| AgentId::from(*p)).collect(),
            recent_events: Vec::new(),
        })
    }

    async fn decide_many(agent: &WanderingAgent, peers: &[&str], n: usize) -> Vec<ActionIntent> {
        let mut intents = Vec::with_capacity(n);
        for _ in 0..n {
            intents.push(
                agent
                    .decide(context("a1", peers), CancellationToken::new())
                    .await
                    .unwrap(),
            );
        }
        intents
    }

    #[tokio::test]
    async fn same_seed_same_choices() {
        let config = Arc::new(WanderConfig::default());
        let first = WanderingAgent::new(AgentId::from("a1"), Arc::clone(&config), 7);
        let second = WanderingAgent::new(AgentId::from("a1"), config, 7);

        assert_eq!(
            decide_many(&first, &["a2", "a3"], 20).await,
            decide_many(&second, &["a2", "a3"], 20).await
        );
        assert_eq!(first.snapshot().unwrap()["decisions"], 20);
    }

    #[tokio::test]
    async fn certain_interaction_targets_a_peer() {
        let config = Arc::new(WanderConfig {
            interact_chance: 1.0,
            ..WanderConfig::default()
        });
        let agent = WanderingAgent::new(AgentId::from("a1"), config, 1);

        for intent in decide_many(&agent, &["a2", "a3"], 10).await {
            assert_eq!(intent.kind, IntentKind::Interact);
            let target = intent.target_agent().unwrap().as_str();
            assert!(target == "a2" || target == "a3");
            assert!(intent.payload_str(payload_keys::UTTERANCE).is_some());
        }
    }

    #[tokio::test]
    async fn no_peers_means_no_interaction() {
        let config = Arc::new(WanderConfig {
            interact_chance: 1.0,
            claim_chance: 0.0,
            move_chance: 0.0,
            ..WanderConfig::default()
        });
        let agent = WanderingAgent::new(AgentId::from("a1"), config, 3);

        for intent in decide_many(&agent, &[], 5).await {
            assert_eq!(intent.kind, IntentKind::Idle);
        }
    }

    #[test]
    fn probabilities_are_sanitised() {
        assert!((probability(2.0) - 1.0).abs() < f64::EPSILON);
        assert!(probability(-1.0).abs() < f64::EPSILON);
        assert!(probability(f64::NAN).abs() < f64::EPSILON);
    }
}
