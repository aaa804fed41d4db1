//! The tick loop.
//!
//! The [`Orchestrator`] owns the world state and the active agent roster and
//! drives every tick through a fixed sequence:
//!
//! 1. Receive the tick signal from the [`SimulationClock`].
//! 2. Build a read-only [`AgentContext`] per active agent.
//! 3. Ask every agent for an intent, concurrently, bounded by a semaphore
//!    and a per-agent deadline. Failures become idle intents.
//! 4. Resolve conflicts serially (see [`conflict`](crate::conflict)).
//! 5. Compose admitted interactions and publish the resulting events.
//! 6. Run maintenance tasks due this tick.
//! 7. Update the world state and checkpoint on snapshot ticks.
//!
//! Only the decision phase runs in parallel. No lock is held while agents,
//! the composer or persistence are awaited.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use society_types::{
    ActionIntent, ActionResult, AgentId, Event, InteractionResult, IntentKind, WorldState,
    WorldStatus, event_types,
};
use tokio::sync::{RwLock, Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::clock::{
    ClockError, JobError, SimulationClock, TaskFailure, TaskId, TaskPhase, TickInfo, TickSignal,
};
use crate::compose::{self, CompositionRequest, DialogueComposer, IntentComposer};
use crate::config::OrchestratorSettings;
use crate::conflict::{self, Pairing};
use crate::context::AgentContext;
use crate::decision::{Agent, DecisionError};
use crate::events;
use crate::persistence::{Checkpoint, NullPersistence, Persistence};
use crate::sync::lock;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from orchestrator control operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The clock rejected the operation.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying error.
        #[from]
        source: ClockError,
    },

    /// The operation needs a running tick loop.
    #[error("tick loop is not running")]
    NotRunning,

    /// An agent with this id is already registered.
    #[error("agent {agent_id} is already registered")]
    AgentExists {
        /// The duplicate id.
        agent_id: AgentId,
    },

    /// No agent with this id is registered.
    #[error("agent {agent_id} is not registered")]
    UnknownAgent {
        /// The missing id.
        agent_id: AgentId,
    },

    /// The tick receiver was lost when the loop task failed.
    #[error("tick receiver is unavailable")]
    TickReceiverUnavailable,

    /// The loop stopped before processing a stepped tick.
    #[error("tick loop stopped before tick {tick} was processed")]
    StepAbandoned {
        /// The stepped tick.
        tick: u64,
    },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime parameters for the tick loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Decision calls in flight at once.
    pub max_concurrent_decisions: usize,
    /// Per-agent decision deadline.
    pub decision_timeout: Duration,
    /// Per-interaction composition deadline.
    pub compose_timeout: Duration,
    /// Recent events included in each context.
    pub context_event_window: usize,
    /// Checkpoint every N ticks (0 disables).
    pub snapshot_interval_ticks: u64,
    /// Whether denials are published.
    pub broadcast_denials: bool,
    /// Publish attempts per event under backpressure.
    pub publish_attempts: u32,
}

impl From<&OrchestratorSettings> for OrchestratorConfig {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            max_concurrent_decisions: settings.max_concurrent_decisions.max(1),
            decision_timeout: Duration::from_millis(settings.decision_timeout_ms),
            compose_timeout: Duration::from_millis(settings.compose_timeout_ms),
            context_event_window: settings.context_event_window,
            snapshot_interval_ticks: settings.snapshot_interval_ticks,
            broadcast_denials: settings.broadcast_denials,
            publish_attempts: settings.publish_attempts.max(1),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&OrchestratorSettings::default())
    }
}

// ---------------------------------------------------------------------------
// Tick summaries
// ---------------------------------------------------------------------------

/// Why an agent's decision was replaced by an idle intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The deadline passed.
    TimedOut,
    /// The agent returned an error.
    Errored,
    /// The loop was stopping.
    Cancelled,
    /// The decision task panicked or was aborted.
    Aborted,
}

/// A recoverable per-agent failure during the decision phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionFailure {
    /// The agent that failed.
    pub agent_id: AgentId,
    /// Failure category.
    pub kind: FailureKind,
    /// Error text.
    pub message: String,
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    /// The processed tick.
    pub tick: u64,
    /// Its simulated time.
    pub sim_time: chrono::DateTime<Utc>,
    /// One result per participating agent, ascending by id.
    pub results: Vec<ActionResult>,
    /// Admitted interactions.
    pub interactions: usize,
    /// Events accepted by the bus.
    pub events_published: usize,
    /// Events dropped after exhausting publish attempts.
    pub events_dropped: usize,
    /// Agents whose decision failed.
    pub decision_failures: Vec<DecisionFailure>,
    /// Scheduled jobs that failed, pre-tick and maintenance.
    pub task_failures: Vec<TaskFailure>,
    /// Wall-clock processing time in milliseconds.
    pub duration_ms: u64,
}

impl TickSummary {
    /// The result for `agent`, if it took part.
    pub fn result_for(&self, agent: &AgentId) -> Option<&ActionResult> {
        self.results.iter().find(|r| &r.agent_id == agent)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct World {
    state: WorldState,
    roster: BTreeMap<AgentId, Arc<dyn Agent>>,
}

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<mpsc::Receiver<TickSignal>>,
}

/// Owns the world and runs the tick loop.
pub struct Orchestrator {
    config: OrchestratorConfig,
    clock: Arc<SimulationClock>,
    bus: Arc<EventBus>,
    persistence: Arc<dyn Persistence>,
    composer: Arc<dyn DialogueComposer>,
    world: RwLock<World>,
    ticks: Mutex<Option<mpsc::Receiver<TickSignal>>>,
    runner: Mutex<Option<Runner>>,
    control: tokio::sync::Mutex<()>,
    summaries: watch::Sender<Option<Arc<TickSummary>>>,
}

impl Orchestrator {
    /// Create an orchestrator over `clock`, consuming its tick receiver.
    ///
    /// Uses [`NullPersistence`] and [`IntentComposer`] until replaced.
    pub fn new(
        config: OrchestratorConfig,
        clock: Arc<SimulationClock>,
        ticks: mpsc::Receiver<TickSignal>,
        bus: Arc<EventBus>,
    ) -> Self {
        let state = WorldState::initial(clock.is_paused(), clock.speed(), Utc::now());
        let (summaries, _) = watch::channel(None);
        Self {
            config,
            clock,
            bus,
            persistence: Arc::new(NullPersistence),
            composer: Arc::new(IntentComposer),
            world: RwLock::new(World {
                state,
                roster: BTreeMap::new(),
            }),
            ticks: Mutex::new(Some(ticks)),
            runner: Mutex::new(None),
            control: tokio::sync::Mutex::new(()),
            summaries,
        }
    }

    /// Store events and checkpoints through `persistence`.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    /// Compose interactions with `composer`.
    #[must_use]
    pub fn with_composer(mut self, composer: Arc<dyn DialogueComposer>) -> Self {
        self.composer = composer;
        self
    }

    /// The clock driving this orchestrator.
    pub const fn clock(&self) -> &Arc<SimulationClock> {
        &self.clock
    }

    /// The bus events are published on.
    pub const fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The persistence sink.
    pub const fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the bus dispatcher, the tick loop and the clock. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::TickReceiverUnavailable`] if a previous
    /// loop task died and took the receiver with it.
    pub async fn start(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        let _control = self.control.lock().await;
        if self.is_running() {
            return Ok(());
        }
        self.reclaim_receiver().await;
        let receiver = lock(&self.ticks)
            .take()
            .ok_or(OrchestratorError::TickReceiverUnavailable)?;

        self.bus.start();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run_loop(receiver, cancel.clone()));
        *lock(&self.runner) = Some(Runner { cancel, handle });
        self.clock.start();

        let state = self.world_state().await;
        info!(
            tick = state.current_tick,
            paused = state.paused,
            speed = state.speed,
            agents = state.active_agent_count,
            "Orchestrator started"
        );
        Ok(())
    }

    /// Stop the clock and the tick loop. A tick already being processed
    /// finishes first; outstanding decisions are cancelled.
    pub async fn stop(&self) {
        let _control = self.control.lock().await;
        self.halt().await;
    }

    /// Stop, then shut the bus down after draining its queue.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.bus.shutdown().await;
        info!("Orchestrator shut down");
    }

    /// Whether the tick loop is running.
    pub fn is_running(&self) -> bool {
        lock(&self.runner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    async fn halt(&self) {
        self.clock.stop().await;
        let runner = lock(&self.runner).take();
        if let Some(runner) = runner {
            runner.cancel.cancel();
            Self::restore_receiver(&self.ticks, runner.handle).await;
            info!(tick = self.clock.current_tick(), "Orchestrator stopped");
        }
    }

    async fn reclaim_receiver(&self) {
        let finished = {
            let mut runner = lock(&self.runner);
            if runner.as_ref().is_some_and(|r| r.handle.is_finished()) {
                runner.take()
            } else {
                None
            }
        };
        if let Some(runner) = finished {
            Self::restore_receiver(&self.ticks, runner.handle).await;
        }
    }

    async fn restore_receiver(
        slot: &Mutex<Option<mpsc::Receiver<TickSignal>>>,
        handle: JoinHandle<mpsc::Receiver<TickSignal>>,
    ) {
        match handle.await {
            Ok(receiver) => *lock(slot) = Some(receiver),
            Err(e) => error!(error = %e, "Tick loop task failed; tick receiver lost"),
        }
    }

    /// Stop everything and return to tick 0 with an empty roster.
    ///
    /// The clock returns to its initial speed and pause state, buffered tick
    /// signals are discarded and the event history is cleared. Agents must
    /// be registered again. Call [`start`](Self::start) to resume.
    pub async fn reset(&self) {
        let _control = self.control.lock().await;
        self.halt().await;
        self.clock.reset().await;

        if let Some(receiver) = lock(&self.ticks).as_mut() {
            while receiver.try_recv().is_ok() {}
        }
        {
            let mut world = self.world.write().await;
            world.roster.clear();
            world.state =
                WorldState::initial(self.clock.is_paused(), self.clock.speed(), Utc::now());
        }
        self.bus.clear_history();
        self.summaries.send_replace(None);
        self.publish_system(events::system_event(event_types::RESET, 0, self.clock.sim_time()));
        info!("World reset");
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Pause the clock.
    pub async fn pause(&self) {
        self.clock.pause();
        self.world.write().await.state.paused = true;
        self.publish_system(self.system_event(event_types::PAUSE));
        info!(tick = self.clock.current_tick(), "Simulation paused");
    }

    /// Resume the clock.
    pub async fn resume(&self) {
        self.clock.resume();
        self.world.write().await.state.paused = false;
        self.publish_system(self.system_event(event_types::RESUME));
        info!(tick = self.clock.current_tick(), "Simulation resumed");
    }

    /// Change the speed multiplier. Returns the clamped value applied.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Clock`] for a non-finite multiplier;
    /// nothing changes in that case.
    pub async fn set_speed(&self, multiplier: f64) -> Result<f64, OrchestratorError> {
        let applied = self.clock.set_speed(multiplier)?;
        self.world.write().await.state.speed = applied;
        self.publish_system(
            self.system_event(event_types::SPEED_CHANGED)
                .with("requested", multiplier)
                .with("speed", applied),
        );
        info!(requested = multiplier, applied, "Simulation speed changed");
        Ok(applied)
    }

    /// Advance one tick while paused and wait for it to be processed.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotRunning`] if the loop is stopped,
    /// [`OrchestratorError::Clock`] if the clock is not paused, or
    /// [`OrchestratorError::StepAbandoned`] if the loop stops first.
    pub async fn step(&self) -> Result<Arc<TickSummary>, OrchestratorError> {
        let loop_cancel = lock(&self.runner)
            .as_ref()
            .filter(|r| !r.handle.is_finished())
            .map(|r| r.cancel.clone())
            .ok_or(OrchestratorError::NotRunning)?;

        let mut summaries = self.summaries.subscribe();
        let info = self.clock.step().await?;

        tokio::select! {
            () = loop_cancel.cancelled() => Err(OrchestratorError::StepAbandoned { tick: info.tick }),
            processed = summaries.wait_for(|s| s.as_ref().is_some_and(|s| s.tick >= info.tick)) => {
                processed
                    .ok()
                    .and_then(|s| s.clone())
                    .ok_or(OrchestratorError::StepAbandoned { tick: info.tick })
            }
        }
    }

    /// Add an agent. It takes part from the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AgentExists`] for a duplicate id.
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<(), OrchestratorError> {
        let agent_id = agent.id().clone();
        {
            let mut world = self.world.write().await;
            if world.roster.contains_key(&agent_id) {
                return Err(OrchestratorError::AgentExists { agent_id });
            }
            world.roster.insert(agent_id.clone(), agent);
            world.state.active_agent_count = agent_count(world.roster.len());
        }
        self.publish_system(events::membership_event(
            event_types::AGENT_JOINED,
            &agent_id,
            self.clock.current_tick(),
            self.clock.sim_time(),
        ));
        info!(agent_id = %agent_id, "Agent registered");
        Ok(())
    }

    /// Remove an agent. It no longer takes part from the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownAgent`] if it is not registered.
    pub async fn deactivate_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Arc<dyn Agent>, OrchestratorError> {
        let removed = {
            let mut world = self.world.write().await;
            let removed = world.roster.remove(agent_id);
            world.state.active_agent_count = agent_count(world.roster.len());
            removed
        };
        let agent = removed.ok_or_else(|| OrchestratorError::UnknownAgent {
            agent_id: agent_id.clone(),
        })?;
        self.publish_system(events::membership_event(
            event_types::AGENT_LEFT,
            agent_id,
            self.clock.current_tick(),
            self.clock.sim_time(),
        ));
        info!(agent_id = %agent_id, "Agent deactivated");
        Ok(agent)
    }

    /// Register a maintenance job run after every `interval`-th tick's
    /// events are published.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Clock`] if `interval` is 0.
    pub fn register_maintenance<F>(
        &self,
        interval: u64,
        label: impl Into<String>,
        job: F,
    ) -> Result<TaskId, OrchestratorError>
    where
        F: Fn(&TickInfo) -> Result<(), JobError> + Send + Sync + 'static,
    {
        Ok(self.clock.schedule_maintenance(interval, label, job)?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// A copy of the world state.
    pub async fn world_state(&self) -> WorldState {
        self.world.read().await.state.clone()
    }

    /// World state plus derived values.
    pub async fn status(&self) -> WorldStatus {
        let state = self.world_state().await;
        let uptime_seconds = Utc::now()
            .signed_duration_since(state.started_at)
            .num_seconds();
        WorldStatus {
            state,
            running: self.is_running(),
            clock_tick: self.clock.current_tick(),
            uptime_seconds,
        }
    }

    /// Registered agent ids, ascending.
    pub async fn list_agents(&self) -> Vec<AgentId> {
        self.world.read().await.roster.keys().cloned().collect()
    }

    /// The most recently processed tick.
    pub fn last_summary(&self) -> Option<Arc<TickSummary>> {
        self.summaries.borrow().clone()
    }

    /// Watch tick summaries as they are produced.
    pub fn tick_summaries(&self) -> watch::Receiver<Option<Arc<TickSummary>>> {
        self.summaries.subscribe()
    }

    // -----------------------------------------------------------------------
    // Tick loop
    // -----------------------------------------------------------------------

    async fn run_loop(
        self: Arc<Self>,
        mut ticks: mpsc::Receiver<TickSignal>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TickSignal> {
        debug!("Tick loop running");
        loop {
            let signal = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = ticks.recv() => match received {
                    Some(signal) => signal,
                    None => {
                        warn!("Clock channel closed");
                        break;
                    }
                },
            };
            let summary = self.process_tick(signal, &cancel).await;
            self.summaries.send_replace(Some(Arc::new(summary)));
        }
        debug!("Tick loop exited");
        ticks
    }

    async fn process_tick(&self, signal: TickSignal, cancel: &CancellationToken) -> TickSummary {
        let started = Instant::now();
        let TickSignal {
            info,
            mut task_failures,
        } = signal;

        let (state, roster) = {
            let world = self.world.read().await;
            (world.state.clone(), world.roster.clone())
        };
        let active: BTreeSet<AgentId> = roster.keys().cloned().collect();

        let (intents, decision_failures) =
            self.collect_intents(&info, &state, &roster, cancel).await;

        let resolution = conflict::resolve(&intents, &active);
        let mut results = resolution.results;

        let interactions = self
            .compose_all(&info, &resolution.pairings, &intents)
            .await;

        let mut outgoing: Vec<Event> = Vec::new();
        for (pairing, interaction) in resolution.pairings.iter().zip(interactions) {
            outgoing.extend(events::interaction_events(&info, pairing, &interaction));
            if pairing.mutual {
                if let Some(result) = results.get_mut(&pairing.partner) {
                    result.interaction = Some(interaction.clone());
                }
            }
            if let Some(result) = results.get_mut(&pairing.initiator) {
                result.interaction = Some(interaction);
            }
        }
        for result in results.values() {
            if !result.success && self.config.broadcast_denials {
                outgoing.push(events::denial_event(&info, result));
            } else if result.success && result.kind == IntentKind::Claim {
                if let Some(intent) = intents.get(&result.agent_id) {
                    outgoing.push(events::claim_event(&info, intent));
                }
            }
        }
        let (events_published, events_dropped) = self.publish_all(outgoing).await;

        task_failures.extend(self.clock.run_due(&info, TaskPhase::Maintenance));

        let state = {
            let mut world = self.world.write().await;
            world.state.current_tick = info.tick;
            world.state.active_agent_count = agent_count(world.roster.len());
            world.state.clone()
        };

        if self.snapshot_due(info.tick) {
            self.checkpoint(&info, state, &roster).await;
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let summary = TickSummary {
            tick: info.tick,
            sim_time: info.sim_time,
            interactions: resolution.pairings.len(),
            results: results.into_values().collect(),
            events_published,
            events_dropped,
            decision_failures,
            task_failures,
            duration_ms,
        };
        debug!(
            tick = summary.tick,
            agents = summary.results.len(),
            interactions = summary.interactions,
            events = summary.events_published,
            duration_ms,
            "Tick processed"
        );
        summary
    }

    async fn collect_intents(
        &self,
        info: &TickInfo,
        state: &WorldState,
        roster: &BTreeMap<AgentId, Arc<dyn Agent>>,
        cancel: &CancellationToken,
    ) -> (BTreeMap<AgentId, ActionIntent>, Vec<DecisionFailure>) {
        let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_decisions));
        let phase = cancel.child_token();
        let peers: Vec<AgentId> = roster.keys().cloned().collect();
        let mut tasks = JoinSet::new();

        for (agent_id, agent) in roster {
            let context = Arc::new(AgentContext {
                agent_id: agent_id.clone(),
                tick: *info,
                world: state.clone(),
                peers: peers.iter().filter(|p| *p != agent_id).cloned().collect(),
                recent_events: self
                    .bus
                    .recent_for_agent(agent_id, self.config.context_event_window)
                    .iter()
                    .map(|event| (**event).clone())
                    .collect(),
            });
            let agent = Arc::clone(agent);
            let limiter = Arc::clone(&limiter);
            let token = phase.child_token();
            let deadline = self.config.decision_timeout;
            let agent_id = agent_id.clone();
            tasks.spawn(async move {
                let outcome = decide(agent.as_ref(), context, &limiter, token, deadline).await;
                (agent_id, outcome)
            });
        }

        let mut intents = BTreeMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((agent_id, Ok(mut intent))) => {
                    if intent.agent_id != agent_id {
                        warn!(
                            agent_id = %agent_id,
                            claimed = %intent.agent_id,
                            "Intent carried a foreign agent id; corrected"
                        );
                        intent.agent_id = agent_id.clone();
                    }
                    intents.insert(agent_id, intent);
                }
                Ok((agent_id, Err(e))) => {
                    let kind = match &e {
                        DecisionError::Timeout { .. } => FailureKind::TimedOut,
                        DecisionError::Cancelled { .. } => FailureKind::Cancelled,
                        DecisionError::Internal { .. } => FailureKind::Errored,
                    };
                    warn!(tick = info.tick, agent_id = %agent_id, error = %e, "Decision failed; agent idles");
                    failures.push(DecisionFailure {
                        agent_id: agent_id.clone(),
                        kind,
                        message: e.to_string(),
                    });
                    intents.insert(agent_id.clone(), ActionIntent::idle(agent_id));
                }
                Err(e) => warn!(tick = info.tick, error = %e, "Decision task aborted"),
            }
        }

        for agent_id in roster.keys() {
            if !intents.contains_key(agent_id) {
                failures.push(DecisionFailure {
                    agent_id: agent_id.clone(),
                    kind: FailureKind::Aborted,
                    message: "decision task panicked".to_owned(),
                });
                intents.insert(agent_id.clone(), ActionIntent::idle(agent_id.clone()));
            }
        }
        (intents, failures)
    }

    async fn compose_all(
        &self,
        info: &TickInfo,
        pairings: &[Pairing],
        intents: &BTreeMap<AgentId, ActionIntent>,
    ) -> Vec<InteractionResult> {
        let calls = pairings
            .iter()
            .map(|pairing| self.compose_one(info, pairing, intents));
        futures::future::join_all(calls).await
    }

    async fn compose_one(
        &self,
        info: &TickInfo,
        pairing: &Pairing,
        intents: &BTreeMap<AgentId, ActionIntent>,
    ) -> InteractionResult {
        let Some(initiator_intent) = intents.get(&pairing.initiator).cloned() else {
            return compose::fallback(pairing);
        };
        let request = CompositionRequest {
            tick: *info,
            pairing: pairing.clone(),
            initiator_intent,
            partner_intent: pairing
                .mutual
                .then(|| intents.get(&pairing.partner).cloned())
                .flatten(),
        };

        let call = AssertUnwindSafe(self.composer.compose(request)).catch_unwind();
        let composed = match tokio::time::timeout(self.config.compose_timeout, call).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!(tick = info.tick, initiator = %pairing.initiator, error = %e, "Composition failed; using neutral outcome");
                compose::fallback(pairing)
            }
            Ok(Err(_)) => {
                warn!(tick = info.tick, initiator = %pairing.initiator, "Composer panicked; using neutral outcome");
                compose::fallback(pairing)
            }
            Err(_) => {
                warn!(tick = info.tick, initiator = %pairing.initiator, "Composition timed out; using neutral outcome");
                compose::fallback(pairing)
            }
        };
        compose::normalize(composed, pairing)
    }

    async fn publish_all(&self, outgoing: Vec<Event>) -> (usize, usize) {
        let mut published = 0_usize;
        let mut dropped = 0_usize;
        for event in outgoing {
            if self.publish_with_retry(event).await {
                published = published.saturating_add(1);
            } else {
                dropped = dropped.saturating_add(1);
            }
        }
        (published, dropped)
    }

    async fn publish_with_retry(&self, event: Event) -> bool {
        let mut attempt = 1_u32;
        loop {
            match self.bus.publish(event.clone()) {
                Ok(_) => return true,
                Err(e) if e.is_retryable() && attempt < self.config.publish_attempts => {
                    attempt = attempt.saturating_add(1);
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    warn!(
                        tick = event.tick,
                        topic = %event.topic,
                        event_type = %event.event_type,
                        error = %e,
                        "Event dropped"
                    );
                    return false;
                }
            }
        }
    }

    fn publish_system(&self, event: Event) {
        if let Err(e) = self.bus.publish(event) {
            warn!(error = %e, "System event dropped");
        }
    }

    fn system_event(&self, event_type: &str) -> Event {
        events::system_event(event_type, self.clock.current_tick(), self.clock.sim_time())
    }

    fn snapshot_due(&self, tick: u64) -> bool {
        tick.checked_rem(self.config.snapshot_interval_ticks) == Some(0)
    }

    async fn checkpoint(
        &self,
        info: &TickInfo,
        world: WorldState,
        roster: &BTreeMap<AgentId, Arc<dyn Agent>>,
    ) {
        let agents = roster
            .iter()
            .filter_map(|(id, agent)| agent.snapshot().map(|snapshot| (id.clone(), snapshot)))
            .collect();
        let checkpoint = Checkpoint {
            tick: info.tick,
            taken_at: info.wall_time,
            world,
            agents,
        };
        let save = AssertUnwindSafe(self.persistence.save_checkpoint(checkpoint)).catch_unwind();
        match save.await {
            Ok(Ok(())) => info!(tick = info.tick, "Checkpoint saved"),
            Ok(Err(e)) => warn!(tick = info.tick, error = %e, "Checkpoint failed"),
            Err(_) => warn!(tick = info.tick, "Checkpoint panicked"),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn decide(
    agent: &dyn Agent,
    context: Arc<AgentContext>,
    limiter: &Semaphore,
    token: CancellationToken,
    deadline: Duration,
) -> Result<ActionIntent, DecisionError> {
    let agent_id = context.agent_id.clone();
    let _permit = tokio::select! {
        () = token.cancelled() => return Err(DecisionError::Cancelled { agent_id }),
        permit = limiter.acquire() => permit.map_err(|e| DecisionError::Internal {
            message: e.to_string(),
        })?,
    };

    let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
    tokio::select! {
        () = token.cancelled() => Err(DecisionError::Cancelled { agent_id }),
        outcome = tokio::time::timeout(deadline, agent.decide(context, token.clone())) => {
            if let Ok(decided) = outcome {
                decided
            } else {
                token.cancel();
                Err(DecisionError::Timeout { agent_id, deadline_ms })
            }
        }
    }
}

fn agent_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
