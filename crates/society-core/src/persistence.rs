//! Persistence seam for events and checkpoints.
//!
//! The core never writes to storage directly. Events reach storage through
//! an observer subscription spawned by [`spawn_event_recorder`], and the
//! orchestrator hands periodic [`Checkpoint`]s to the same [`Persistence`]
//! implementation. Storage failures are logged and never stall the tick
//! loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use society_types::{AgentId, Event, EventTopic, WorldState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{BusError, EventBus, SubscriberScope};

/// Observer name the event recorder subscribes under.
pub const RECORDER_NAME: &str = "persistence";

/// Errors from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying error.
        #[from]
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("serialization error: {source}")]
    Serialize {
        /// The underlying error.
        #[from]
        source: serde_json::Error,
    },

    /// Any other backend failure.
    #[error("storage backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// A snapshot of the world taken every few ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Tick the checkpoint was taken after.
    pub tick: u64,
    /// Wall-clock time of that tick.
    pub taken_at: DateTime<Utc>,
    /// World state after the tick.
    pub world: WorldState,
    /// Per-agent snapshots, for agents that provide one.
    pub agents: BTreeMap<AgentId, serde_json::Value>,
}

/// Durable storage for the simulation.
pub trait Persistence: Send + Sync {
    /// Store a batch of dispatched events, in dispatch order.
    fn record_events(&self, events: Vec<Event>) -> BoxFuture<'_, Result<(), PersistenceError>>;

    /// Store a checkpoint.
    fn save_checkpoint(&self, checkpoint: Checkpoint) -> BoxFuture<'_, Result<(), PersistenceError>>;
}

/// Storage that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn record_events(&self, _events: Vec<Event>) -> BoxFuture<'_, Result<(), PersistenceError>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn save_checkpoint(
        &self,
        _checkpoint: Checkpoint,
    ) -> BoxFuture<'_, Result<(), PersistenceError>> {
        futures::future::ready(Ok(())).boxed()
    }
}

/// Subscribe `sink` to every topic and forward dispatched events in batches
/// of at most `batch_size`.
///
/// The recorder stops when `cancel` fires or the bus shuts down, flushing
/// whatever it has already received.
///
/// # Errors
///
/// Returns [`BusError::AlreadySubscribed`] if a recorder is already
/// attached to `bus`.
pub fn spawn_event_recorder(
    bus: &EventBus,
    sink: Arc<dyn Persistence>,
    batch_size: usize,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, BusError> {
    let subscription = bus.subscribe_many(
        SubscriberScope::Observer(RECORDER_NAME.to_owned()),
        &EventTopic::ALL,
        None,
    )?;
    let batch_size = batch_size.max(1);

    Ok(tokio::spawn(async move {
        loop {
            let first = tokio::select! {
                () = cancel.cancelled() => break,
                received = subscription.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
            };

            let mut batch = vec![(*first).clone()];
            while batch.len() < batch_size {
                match subscription.try_recv() {
                    Some(event) => batch.push((*event).clone()),
                    None => break,
                }
            }
            store(sink.as_ref(), batch).await;
        }

        let rest: Vec<Event> = subscription
            .drain()
            .into_iter()
            .map(|event| (*event).clone())
            .collect();
        if !rest.is_empty() {
            store(sink.as_ref(), rest).await;
        }
        debug!("Event recorder stopped");
    }))
}

async fn store(sink: &dyn Persistence, batch: Vec<Event>) {
    let count = batch.len();
    if let Err(e) = sink.record_events(batch).await {
        warn!(error = %e, count, "Failed to record events");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use society_types::{EventTopic, event_types, sources};

    use super::*;
    use crate::bus::BusConfig;

    /// In-memory storage for tests.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryPersistence {
        pub(crate) events: Mutex<Vec<Event>>,
        pub(crate) checkpoints: Mutex<Vec<Checkpoint>>,
    }

    impl Persistence for MemoryPersistence {
        fn record_events(
            &self,
            events: Vec<Event>,
        ) -> BoxFuture<'_, Result<(), PersistenceError>> {
            self.events.lock().unwrap().extend(events);
            futures::future::ready(Ok(())).boxed()
        }

        fn save_checkpoint(
            &self,
            checkpoint: Checkpoint,
        ) -> BoxFuture<'_, Result<(), PersistenceError>> {
            self.checkpoints.lock().unwrap().push(checkpoint);
            futures::future::ready(Ok(())).boxed()
        }
    }

    fn event(tick: u64) -> Event {
        Event::new(
            EventTopic::Global,
            event_types::DISCOVERY,
            sources::SYSTEM,
            tick,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn recorder_stores_dispatched_events_in_order() {
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        let sink = Arc::new(MemoryPersistence::default());
        let cancel = CancellationToken::new();
        let handle = spawn_event_recorder(
            &bus,
            Arc::clone(&sink) as Arc<dyn Persistence>,
            2,
            cancel.clone(),
        )
        .unwrap();
        bus.start();

        for tick in 1..=5 {
            bus.publish(event(tick)).unwrap();
        }
        bus.flush().await;
        cancel.cancel();
        handle.await.unwrap();

        let ticks: Vec<u64> = sink.events.lock().unwrap().iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn second_recorder_is_rejected() {
        let bus = EventBus::new(BusConfig::default());
        let cancel = CancellationToken::new();
        let _first =
            spawn_event_recorder(&bus, Arc::new(NullPersistence), 8, cancel.clone()).unwrap();
        let second = spawn_event_recorder(&bus, Arc::new(NullPersistence), 8, cancel.clone());
        assert!(matches!(second, Err(BusError::AlreadySubscribed { .. })));
        cancel.cancel();
    }
}
