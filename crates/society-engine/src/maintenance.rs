//! Periodic maintenance jobs registered with the orchestrator's clock.
//!
//! | Label                  | Topic          | Event type             |
//! |------------------------|----------------|------------------------|
//! | `memory_consolidation` | `memory`       | `memory_consolidation` |
//! | `mood_decay`           | `mood_change`  | `mood_decay`           |
//! | `random_event`         | `global`       | weighted world event   |
//!
//! Jobs run synchronously after a tick has been resolved, so they only
//! publish announcements; agents react to them on the next tick.
//!
//! # Random world events
//!
//! Each roll succeeds with `random_event_chance`. A successful roll picks
//! an event type from a weighted table using a generator seeded from the
//! world seed, so the same seed yields the same event sequence.

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use society_core::bus::EventBus;
use society_core::clock::{JobError, TickInfo};
use society_core::config::MaintenanceConfig;
use society_core::orchestrator::{Orchestrator, OrchestratorError};
use society_types::{Event, EventTopic, event_types, priorities, sources};
use tracing::{debug, info};

/// Label of the memory consolidation job.
pub const MEMORY_CONSOLIDATION: &str = "memory_consolidation";
/// Label of the mood decay job.
pub const MOOD_DECAY: &str = "mood_decay";
/// Label of the random world event job.
pub const RANDOM_EVENT: &str = "random_event";

/// World event types and their relative weights.
const WORLD_EVENTS: &[(&str, u32)] = &[
    (event_types::WEATHER_CHANGE, 45),
    (event_types::DISCOVERY, 25),
    (event_types::CELEBRATION, 20),
    (event_types::DISASTER, 10),
];

/// Register every enabled maintenance job. Intervals of 0 are skipped.
///
/// # Errors
///
/// Returns [`OrchestratorError::Clock`] if the clock rejects a job.
pub fn register(
    orchestrator: &Orchestrator,
    config: &MaintenanceConfig,
    seed: u64,
) -> Result<usize, OrchestratorError> {
    let bus = orchestrator.bus();
    let mut registered = 0_usize;

    if config.memory_consolidation_interval > 0 {
        orchestrator.register_maintenance(
            config.memory_consolidation_interval,
            MEMORY_CONSOLIDATION,
            memory_consolidation(Arc::clone(bus)),
        )?;
        registered = registered.saturating_add(1);
    }

    if config.mood_decay_interval > 0 {
        orchestrator.register_maintenance(
            config.mood_decay_interval,
            MOOD_DECAY,
            mood_decay(Arc::clone(bus), config.mood_decay_factor),
        )?;
        registered = registered.saturating_add(1);
    }

    if config.random_event_interval > 0 {
        orchestrator.register_maintenance(
            config.random_event_interval,
            RANDOM_EVENT,
            random_event(Arc::clone(bus), config.random_event_chance, seed),
        )?;
        registered = registered.saturating_add(1);
    }

    info!(registered, "Maintenance jobs registered");
    Ok(registered)
}

/// Announce a memory consolidation pass to every agent.
pub fn memory_consolidation(
    bus: Arc<EventBus>,
) -> impl Fn(&TickInfo) -> Result<(), JobError> + Send + Sync + 'static {
    move |info| {
        let event = Event::new(
            EventTopic::Memory,
            event_types::MEMORY_CONSOLIDATION,
            sources::SYSTEM,
            info.tick,
            info.sim_time,
        );
        publish(&bus, event)
    }
}

/// Announce a mood decay pass carrying the retained intensity `factor`.
pub fn mood_decay(
    bus: Arc<EventBus>,
    factor: f64,
) -> impl Fn(&TickInfo) -> Result<(), JobError> + Send + Sync + 'static {
    let factor = if factor.is_finite() {
        factor.clamp(0.0, 1.0)
    } else {
        1.0
    };
    move |info| {
        let event = Event::new(
            EventTopic::MoodChange,
            event_types::MOOD_DECAY,
            sources::SYSTEM,
            info.tick,
            info.sim_time,
        )
        .with("factor", factor);
        publish(&bus, event)
    }
}

/// Roll for a random world event and broadcast it on success.
pub fn random_event(
    bus: Arc<EventBus>,
    chance: f64,
    seed: u64,
) -> impl Fn(&TickInfo) -> Result<(), JobError> + Send + Sync + 'static {
    let chance = if chance.is_finite() {
        chance.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let rng = Mutex::new(StdRng::seed_from_u64(seed));
    move |info| {
        let kind = {
            let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
            if !rng.random_bool(chance) {
                return Ok(());
            }
            let total: u32 = WORLD_EVENTS.iter().map(|(_, weight)| *weight).sum();
            select(rng.random_range(0..total))
        };

        debug!(tick = info.tick, kind, "World event rolled");
        let event = Event::new(
            EventTopic::Global,
            kind,
            sources::SYSTEM,
            info.tick,
            info.sim_time,
        )
        .with_priority(priorities::ELEVATED);
        publish(&bus, event)
    }
}

/// Map a roll in `0..total_weight` onto the weighted table.
fn select(roll: u32) -> &'static str {
    let mut cumulative = 0_u32;
    for (kind, weight) in WORLD_EVENTS {
        cumulative = cumulative.saturating_add(*weight);
        if roll < cumulative {
            return kind;
        }
    }
    event_types::WEATHER_CHANGE
}

fn publish(bus: &EventBus, event: Event) -> Result<(), JobError> {
    bus.publish(event)
        .map(|_| ())
        .map_err(|e| JobError::new(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use society_core::bus::{BusConfig, HistoryQuery};

    use super::*;

    fn info(tick: u64) -> TickInfo {
        TickInfo {
            tick,
            sim_time: DateTime::<Utc>::UNIX_EPOCH,
            delta: Duration::from_secs(1),
            wall_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn consolidation_is_broadcast_on_memory_topic() {
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        memory_consolidation(Arc::clone(&bus))(&info(50)).unwrap();

        let history = bus.history(&HistoryQuery::default());
        let event = history.first().unwrap();
        assert_eq!(event.topic, EventTopic::Memory);
        assert_eq!(event.tick, 50);
        assert!(event.is_broadcast());
    }

    #[test]
    fn mood_decay_carries_clamped_factor() {
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        mood_decay(Arc::clone(&bus), 1.5)(&info(10)).unwrap();

        let history = bus.history(&HistoryQuery::default());
        let event = history.first().unwrap();
        assert_eq!(event.event_type, event_types::MOOD_DECAY);
        assert_eq!(event.payload["factor"], 1.0);
    }

    #[test]
    fn random_events_follow_the_seed() {
        let first = Arc::new(EventBus::new(BusConfig::default()));
        let second = Arc::new(EventBus::new(BusConfig::default()));
        let roll_first = random_event(Arc::clone(&first), 0.5, 99);
        let roll_second = random_event(Arc::clone(&second), 0.5, 99);

        for tick in 1..=40 {
            roll_first(&info(tick)).unwrap();
            roll_second(&info(tick)).unwrap();
        }

        let kinds = |bus: &EventBus| -> Vec<(u64, String)> {
            bus.history(&HistoryQuery::default())
                .iter()
                .map(|e| (e.tick, e.event_type.clone()))
                .collect()
        };
        assert_eq!(kinds(&first), kinds(&second));
        for event in first.history(&HistoryQuery::default()) {
            assert_eq!(event.topic, EventTopic::Global);
            assert_eq!(event.priority, priorities::ELEVATED);
        }
    }

    #[test]
    fn zero_chance_never_fires() {
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        let roll = random_event(Arc::clone(&bus), 0.0, 1);
        for tick in 1..=20 {
            roll(&info(tick)).unwrap();
        }
        assert_eq!(bus.history_len(), 0);
    }

    #[test]
    fn weighted_table_covers_every_roll() {
        assert_eq!(select(0), event_types::WEATHER_CHANGE);
        assert_eq!(select(45), event_types::DISCOVERY);
        assert_eq!(select(70), event_types::CELEBRATION);
        assert_eq!(select(99), event_types::DISASTER);
    }
}
