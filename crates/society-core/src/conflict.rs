//! Deterministic conflict resolution for one tick's intents.
//!
//! Resolution is a pure function of the intents and the active roster: the
//! same input always produces the same output, independent of the order in
//! which decisions arrived. The rules, applied in this order:
//!
//! 1. **Validation**: an interact intent needs an active agent target other
//!    than itself; a claim intent needs a resource target. Invalid intents
//!    are denied.
//! 2. **Untargeted intents** (idle, move) never conflict and always succeed.
//! 3. **Mutual pairs**: when A targets B and B targets A, both are admitted
//!    into a single shared interaction.
//! 4. **Contested interactions**: remaining interact intents are grouped by
//!    target. Each target admits exactly one initiator, the lowest id, and
//!    denies the rest; a target held by a mutual pair denies everyone.
//!    Groups are settled independently, so an agent may receive one
//!    interaction and start another in the same tick.
//! 5. **Resource claims**: per resource, the lowest agent id wins and every
//!    other claimant is denied.
//!
//! Every intent yields exactly one [`ActionResult`].

use std::collections::{BTreeMap, BTreeSet};

use society_types::{ActionIntent, ActionResult, AgentId, IntentKind, Target};

/// Reason given to successful untargeted intents.
pub const REASON_OK: &str = "ok";
/// Reason given to both sides of a mutual interaction.
pub const REASON_MUTUAL: &str = "mutual interaction";
/// Reason given to an admitted one-sided interaction.
pub const REASON_ADMITTED: &str = "interaction admitted";
/// Reason given to the winning claimant of a resource.
pub const REASON_CLAIMED: &str = "resource claimed";
/// Reason given when the interaction target is already engaged.
pub const REASON_TARGET_BUSY: &str = "target agent is busy";
/// Reason given to losing claimants of a resource.
pub const REASON_RESOURCE_TAKEN: &str = "resource is already claimed";
/// Reason given when the interaction target is not an active agent.
pub const REASON_TARGET_INACTIVE: &str = "target agent is not active";
/// Reason given when an agent targets itself.
pub const REASON_SELF_TARGET: &str = "agent cannot target itself";
/// Reason given when an intent lacks the target its kind requires.
pub const REASON_INVALID_TARGET: &str = "intent has no valid target for its kind";

/// An admitted interaction between two agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    /// The agent whose intent was admitted (the smaller id for mutual pairs).
    pub initiator: AgentId,
    /// The other participant.
    pub partner: AgentId,
    /// Whether both agents targeted each other.
    pub mutual: bool,
}

impl Pairing {
    /// Participants ordered by id, smaller first.
    pub fn ordered(&self) -> (&AgentId, &AgentId) {
        if self.initiator <= self.partner {
            (&self.initiator, &self.partner)
        } else {
            (&self.partner, &self.initiator)
        }
    }
}

/// The outcome of resolving one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// One result per intent, keyed by agent.
    pub results: BTreeMap<AgentId, ActionResult>,
    /// Admitted interactions, in admission order.
    pub pairings: Vec<Pairing>,
}

/// Resolve a tick's intents against the set of active agents.
///
/// `intents` is keyed by the deciding agent; the key is authoritative over
/// `ActionIntent::agent_id`.
pub fn resolve(
    intents: &BTreeMap<AgentId, ActionIntent>,
    active: &BTreeSet<AgentId>,
) -> Resolution {
    let mut results = BTreeMap::new();
    let mut interacts: BTreeMap<&AgentId, &AgentId> = BTreeMap::new();
    let mut claims: BTreeMap<&str, Vec<&AgentId>> = BTreeMap::new();

    for (agent, intent) in intents {
        match (intent.kind, &intent.target) {
            (IntentKind::Idle | IntentKind::Move, _) => {
                results.insert(
                    agent.clone(),
                    ActionResult::admitted(agent.clone(), intent.kind, REASON_OK),
                );
            }
            (IntentKind::Interact, Some(Target::Agent(target))) => {
                if target == agent {
                    results.insert(
                        agent.clone(),
                        ActionResult::denied(agent.clone(), intent.kind, REASON_SELF_TARGET),
                    );
                } else if !active.contains(target) {
                    results.insert(
                        agent.clone(),
                        ActionResult::denied(agent.clone(), intent.kind, REASON_TARGET_INACTIVE),
                    );
                } else {
                    interacts.insert(agent, target);
                }
            }
            (IntentKind::Claim, Some(Target::Resource(key))) => {
                claims.entry(key.as_str()).or_default().push(agent);
            }
            (IntentKind::Interact | IntentKind::Claim, _) => {
                results.insert(
                    agent.clone(),
                    ActionResult::denied(agent.clone(), intent.kind, REASON_INVALID_TARGET),
                );
            }
        }
    }

    let mut mutual: BTreeSet<&AgentId> = BTreeSet::new();
    let mut pairings = Vec::new();

    // Mutual pairs first: each pair is seen once, from its smaller id.
    for (&initiator, &target) in &interacts {
        let reciprocated = interacts.get(target).is_some_and(|back| *back == initiator);
        if reciprocated && initiator < target {
            mutual.insert(initiator);
            mutual.insert(target);
            pairings.push(Pairing {
                initiator: initiator.clone(),
                partner: target.clone(),
                mutual: true,
            });
            for agent in [initiator, target] {
                if let Some(intent) = intents.get(agent) {
                    results.insert(
                        agent.clone(),
                        ActionResult::admitted(agent.clone(), intent.kind, REASON_MUTUAL),
                    );
                }
            }
        }
    }

    // Contenders per target, pushed in ascending initiator order.
    let mut contenders: BTreeMap<&AgentId, Vec<&AgentId>> = BTreeMap::new();
    for (&initiator, &target) in &interacts {
        if !mutual.contains(initiator) {
            contenders.entry(target).or_default().push(initiator);
        }
    }

    for (&target, initiators) in &contenders {
        let open = !mutual.contains(target);
        for (rank, &initiator) in initiators.iter().enumerate() {
            let Some(intent) = intents.get(initiator) else {
                continue;
            };
            let outcome = if open && rank == 0 {
                pairings.push(Pairing {
                    initiator: initiator.clone(),
                    partner: target.clone(),
                    mutual: false,
                });
                ActionResult::admitted(initiator.clone(), intent.kind, REASON_ADMITTED)
            } else {
                ActionResult::denied(initiator.clone(), intent.kind, REASON_TARGET_BUSY)
            };
            results.insert(initiator.clone(), outcome);
        }
    }

    // Claimants were pushed in ascending id order.
    for claimants in claims.values() {
        for (rank, &agent) in claimants.iter().enumerate() {
            let Some(intent) = intents.get(agent) else {
                continue;
            };
            let outcome = if rank == 0 {
                ActionResult::admitted(agent.clone(), intent.kind, REASON_CLAIMED)
            } else {
                ActionResult::denied(agent.clone(), intent.kind, REASON_RESOURCE_TAKEN)
            };
            results.insert(agent.clone(), outcome);
        }
    }

    Resolution { results, pairings }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id(s: &str) -> AgentId {
        AgentId::from(s)
    }

    fn roster(ids: &[&str]) -> BTreeSet<AgentId> {
        ids.iter().map(|s| id(s)).collect()
    }

    fn intents(list: Vec<ActionIntent>) -> BTreeMap<AgentId, ActionIntent> {
        list.into_iter().map(|i| (i.agent_id.clone(), i)).collect()
    }

    fn outcome<'a>(resolution: &'a Resolution, agent: &str) -> &'a ActionResult {
        resolution.results.get(&id(agent)).unwrap()
    }

    #[test]
    fn untargeted_intents_always_succeed() {
        let active = roster(&["a", "b"]);
        let resolution = resolve(
            &intents(vec![ActionIntent::idle(id("a")), ActionIntent::move_to(id("b"), "square")]),
            &active,
        );
        assert!(outcome(&resolution, "a").success);
        assert!(outcome(&resolution, "b").success);
        assert!(resolution.pairings.is_empty());
    }

    #[test]
    fn single_admission_by_ascending_id() {
        let active = roster(&["a1", "a2", "a3"]);
        let resolution = resolve(
            &intents(vec![
                ActionIntent::interact(id("a1"), id("a3")),
                ActionIntent::interact(id("a2"), id("a3")),
                ActionIntent::idle(id("a3")),
            ]),
            &active,
        );
        assert!(outcome(&resolution, "a1").success);
        let denied = outcome(&resolution, "a2");
        assert!(!denied.success);
        assert_eq!(denied.reason, REASON_TARGET_BUSY);
        assert_eq!(resolution.pairings.len(), 1);
        assert_eq!(resolution.results.len(), 3);
    }

    #[test]
    fn mutual_intents_merge_into_one_pairing() {
        let active = roster(&["b", "a"]);
        let resolution = resolve(
            &intents(vec![
                ActionIntent::interact(id("b"), id("a")),
                ActionIntent::interact(id("a"), id("b")),
            ]),
            &active,
        );
        assert_eq!(
            resolution.pairings,
            vec![Pairing {
                initiator: id("a"),
                partner: id("b"),
                mutual: true
            }]
        );
        assert_eq!(outcome(&resolution, "a").reason, REASON_MUTUAL);
        assert_eq!(outcome(&resolution, "b").reason, REASON_MUTUAL);
    }

    #[test]
    fn mutual_pair_beats_lower_contender() {
        // a targets c, but b and c target each other.
        let active = roster(&["a", "b", "c"]);
        let resolution = resolve(
            &intents(vec![
                ActionIntent::interact(id("a"), id("c")),
                ActionIntent::interact(id("b"), id("c")),
                ActionIntent::interact(id("c"), id("b")),
            ]),
            &active,
        );
        assert_eq!(outcome(&resolution, "a").reason, REASON_TARGET_BUSY);
        assert!(outcome(&resolution, "b").success);
        assert!(outcome(&resolution, "c").success);
    }

    #[test]
    fn contested_target_with_own_intent_still_admits_one() {
        // t sorts before its contenders and wants to talk to z itself.
        let active = roster(&["t", "x", "y", "z"]);
        let resolution = resolve(
            &intents(vec![
                ActionIntent::interact(id("t"), id("z")),
                ActionIntent::interact(id("x"), id("t")),
                ActionIntent::interact(id("y"), id("t")),
            ]),
            &active,
        );
        assert_eq!(outcome(&resolution, "x").reason, REASON_ADMITTED);
        assert_eq!(outcome(&resolution, "y").reason, REASON_TARGET_BUSY);
        assert_eq!(outcome(&resolution, "t").reason, REASON_ADMITTED);
        assert_eq!(resolution.pairings.len(), 2);
    }

    #[test]
    fn contested_target_sorting_after_its_own_target() {
        let active = roster(&["a", "b", "c", "d"]);
        let resolution = resolve(
            &intents(vec![
                ActionIntent::interact(id("b"), id("a")),
                ActionIntent::interact(id("c"), id("b")),
                ActionIntent::interact(id("d"), id("b")),
            ]),
            &active,
        );
        assert!(outcome(&resolution, "b").success);
        assert!(outcome(&resolution, "c").success);
        assert_eq!(outcome(&resolution, "d").reason, REASON_TARGET_BUSY);

        let into_b = resolution
            .pairings
            .iter()
            .filter(|p| p.partner == id("b"))
            .count();
        assert_eq!(into_b, 1);
    }

    #[test]
    fn one_sided_cycle_admits_every_link() {
        let active = roster(&["a", "b", "c"]);
        let resolution = resolve(
            &intents(vec![
                ActionIntent::interact(id("a"), id("b")),
                ActionIntent::interact(id("b"), id("c")),
                ActionIntent::interact(id("c"), id("a")),
            ]),
            &active,
        );
        for agent in ["a", "b", "c"] {
            assert_eq!(outcome(&resolution, agent).reason, REASON_ADMITTED);
        }
        assert!(resolution.pairings.iter().all(|p| !p.mutual));
    }

    #[test]
    fn invalid_targets_are_denied() {
        let active = roster(&["a", "b", "c"]);
        let mut no_target = ActionIntent::interact(id("c"), id("a"));
        no_target.target = None;
        let resolution = resolve(
            &intents(vec![
                ActionIntent::interact(id("a"), id("a")),
                ActionIntent::interact(id("b"), id("ghost")),
                no_target,
            ]),
            &active,
        );
        assert_eq!(outcome(&resolution, "a").reason, REASON_SELF_TARGET);
        assert_eq!(outcome(&resolution, "b").reason, REASON_TARGET_INACTIVE);
        assert_eq!(outcome(&resolution, "c").reason, REASON_INVALID_TARGET);
        assert!(resolution.pairings.is_empty());
    }

    #[test]
    fn resource_goes_to_lowest_id() {
        let active = roster(&["x", "y", "z"]);
        let resolution = resolve(
            &intents(vec![
                ActionIntent::claim(id("z"), "well"),
                ActionIntent::claim(id("y"), "well"),
                ActionIntent::claim(id("x"), "orchard"),
            ]),
            &active,
        );
        assert_eq!(outcome(&resolution, "x").reason, REASON_CLAIMED);
        assert_eq!(outcome(&resolution, "y").reason, REASON_CLAIMED);
        assert_eq!(outcome(&resolution, "z").reason, REASON_RESOURCE_TAKEN);
        assert!(!outcome(&resolution, "z").success);
    }

    #[test]
    fn resolution_is_deterministic() {
        let active = roster(&["a", "b", "c", "d"]);
        let list = vec![
            ActionIntent::interact(id("d"), id("a")),
            ActionIntent::interact(id("c"), id("a")),
            ActionIntent::interact(id("b"), id("d")),
            ActionIntent::claim(id("a"), "well"),
        ];
        let mut reversed = list.clone();
        reversed.reverse();
        assert_eq!(resolve(&intents(list), &active), resolve(&intents(reversed), &active));
    }

    #[test]
    fn every_intent_gets_one_result() {
        let active = roster(&["a", "b", "c", "d", "e"]);
        let all = intents(vec![
            ActionIntent::interact(id("a"), id("b")),
            ActionIntent::interact(id("b"), id("a")),
            ActionIntent::interact(id("c"), id("a")),
            ActionIntent::claim(id("d"), "well"),
            ActionIntent::claim(id("e"), "well"),
        ]);
        let resolution = resolve(&all, &active);
        let keys: Vec<&AgentId> = resolution.results.keys().collect();
        let expected: Vec<&AgentId> = all.keys().collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn pairing_orders_participants() {
        let pairing = Pairing {
            initiator: id("b"),
            partner: id("a"),
            mutual: false,
        };
        assert_eq!(pairing.ordered(), (&id("a"), &id("b")));
    }
}
