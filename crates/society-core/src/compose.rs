//! Dialogue composition for admitted interactions.
//!
//! Once conflict resolution admits a pairing, a [`DialogueComposer`] turns
//! the two participants' intents into an [`InteractionResult`]: the lines
//! spoken, the change to their relationship, and how each of them feels
//! afterwards. Composers may be slow (a language model, a remote service);
//! the orchestrator bounds each call and substitutes a neutral outcome when
//! one fails or runs over.

use std::collections::BTreeMap;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use society_types::{ActionIntent, DialogueTurn, InteractionResult, payload_keys};

use crate::clock::TickInfo;
use crate::conflict::Pairing;

/// Emotion recorded when an intent names none.
pub const DEFAULT_EMOTION: &str = "neutral";

/// Errors a composer can return.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// The backend failed to produce an interaction.
    #[error("composition failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

/// Input to one composition call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionRequest {
    /// The tick the interaction happens on.
    pub tick: TickInfo,
    /// The admitted pairing.
    pub pairing: Pairing,
    /// The initiator's intent.
    pub initiator_intent: ActionIntent,
    /// The partner's intent, present only for mutual pairings.
    pub partner_intent: Option<ActionIntent>,
}

impl CompositionRequest {
    /// The intents taking part in the interaction, initiator first.
    pub fn intents(&self) -> impl Iterator<Item = &ActionIntent> {
        std::iter::once(&self.initiator_intent).chain(self.partner_intent.as_ref())
    }
}

/// Produces the outcome of an admitted interaction.
pub trait DialogueComposer: Send + Sync {
    /// Compose one interaction.
    fn compose(
        &self,
        request: CompositionRequest,
    ) -> BoxFuture<'_, Result<InteractionResult, ComposeError>>;
}

/// Builds interactions straight from what the agents put in their intents.
///
/// Each intent may carry an `utterance`, an `emotion`, and a numeric
/// `sentiment`. Utterances become dialogue turns, emotions become the
/// emotional impact, and the mean sentiment becomes the relationship delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentComposer;

impl IntentComposer {
    fn build(request: &CompositionRequest) -> InteractionResult {
        let (agent1, agent2) = request.pairing.ordered();
        let mut result = InteractionResult::neutral(agent1.clone(), agent2.clone());
        let mut sentiments = Vec::new();

        for intent in request.intents() {
            let emotion = intent
                .payload_str(payload_keys::EMOTION)
                .unwrap_or(DEFAULT_EMOTION);

            if let Some(line) = intent.payload_str(payload_keys::UTTERANCE) {
                result.dialogue.push(DialogueTurn {
                    speaker_id: intent.agent_id.clone(),
                    content: line.to_owned(),
                    emotion: emotion.to_owned(),
                    timestamp: request.tick.sim_time,
                });
            }
            if let Some(sentiment) = intent
                .payload
                .get(payload_keys::SENTIMENT)
                .and_then(Value::as_f64)
            {
                sentiments.push(sentiment);
            }
            result
                .emotional_impact
                .insert(intent.agent_id.clone(), emotion.to_owned());
        }

        result.relationship_delta = mean(&sentiments);
        result
    }
}

impl DialogueComposer for IntentComposer {
    fn compose(
        &self,
        request: CompositionRequest,
    ) -> BoxFuture<'_, Result<InteractionResult, ComposeError>> {
        futures::future::ready(Ok(Self::build(&request))).boxed()
    }
}

fn mean(values: &[f64]) -> f64 {
    let Ok(count) = u32::try_from(values.len()) else {
        return 0.0;
    };
    if count == 0 {
        return 0.0;
    }
    values.iter().sum::<f64>() / f64::from(count)
}

/// Force a composed result into shape for `pairing`.
///
/// Participant ids are taken from the pairing, the relationship delta is
/// clamped to `[-1, 1]` (non-finite values become 0), and emotional impact
/// entries for anyone outside the pairing are dropped.
pub fn normalize(mut result: InteractionResult, pairing: &Pairing) -> InteractionResult {
    let (agent1, agent2) = pairing.ordered();
    result.agent1_id = agent1.clone();
    result.agent2_id = agent2.clone();
    result.relationship_delta = if result.relationship_delta.is_finite() {
        result.relationship_delta.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    result
        .emotional_impact
        .retain(|agent, _| agent == agent1 || agent == agent2);
    result
}

/// The result used when composition fails or times out.
pub fn fallback(pairing: &Pairing) -> InteractionResult {
    let (agent1, agent2) = pairing.ordered();
    let mut result = InteractionResult::neutral(agent1.clone(), agent2.clone());
    result.emotional_impact = BTreeMap::from([
        (agent1.clone(), DEFAULT_EMOTION.to_owned()),
        (agent2.clone(), DEFAULT_EMOTION.to_owned()),
    ]);
    result
}
