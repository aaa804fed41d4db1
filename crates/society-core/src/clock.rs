//! Simulation clock for the Society simulation.
//!
//! The clock is the single source of truth for simulated time. It emits one
//! [`TickSignal`] per tick over a bounded channel, at an interval of
//! `tick_duration / speed`, and hosts the tick-indexed task scheduler.
//!
//! # Design Principles
//!
//! - The tick counter only moves forward, one step at a time, and every
//!   emitted tick reaches the consumer in order. Pausing never resets it.
//! - Simulated time advances by exactly `tick_duration` per tick; the speed
//!   multiplier only changes the wall-clock gap between ticks.
//! - Scheduled jobs are plain records indexed by their due tick. Pre-tick
//!   jobs run inside the clock before the signal is sent; maintenance jobs
//!   run when the consumer asks for them.
//! - A failing or panicking job is reported as a [`TaskFailure`] and never
//!   stops the clock.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClockSettings;
use crate::sync::lock;

/// Slowest allowed speed multiplier.
pub const MIN_SPEED: f64 = 0.1;

/// Fastest allowed speed multiplier.
pub const MAX_SPEED: f64 = 10.0;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter or simulated time would overflow.
    #[error("tick counter overflow: cannot advance beyond tick {tick}")]
    TickOverflow {
        /// The last tick that was reached.
        tick: u64,
    },

    /// `step` was called while the clock is running.
    #[error("the clock is not paused; step is only allowed while paused")]
    NotPaused,

    /// A speed multiplier that is NaN or infinite.
    #[error("invalid speed multiplier: {value}")]
    InvalidSpeed {
        /// The rejected value.
        value: f64,
    },

    /// A recurring task with a zero interval.
    #[error("invalid interval for task {label}: must be at least 1 tick")]
    InvalidInterval {
        /// Label of the rejected task.
        label: String,
    },

    /// Invalid clock configuration.
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },

    /// The tick receiver has been dropped.
    #[error("tick consumer is gone")]
    ConsumerGone,
}

// ---------------------------------------------------------------------------
// Tick signals
// ---------------------------------------------------------------------------

/// Timing information for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickInfo {
    /// Tick number; the first emitted tick is 1.
    pub tick: u64,
    /// Simulated time at this tick.
    pub sim_time: DateTime<Utc>,
    /// Simulated time elapsed since the previous tick.
    pub delta: Duration,
    /// Wall-clock time the tick was emitted.
    pub wall_time: DateTime<Utc>,
}

/// What the clock hands to its consumer every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSignal {
    /// Timing of the tick.
    pub info: TickInfo,
    /// Pre-tick jobs that failed while preparing this tick.
    pub task_failures: Vec<TaskFailure>,
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Error returned by a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    /// What went wrong.
    pub message: String,
}

impl JobError {
    /// Create a job error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A scheduled callback. Runs synchronously on the thread that processes
/// the tick and must not block.
pub type Job = Arc<dyn Fn(&TickInfo) -> Result<(), JobError> + Send + Sync>;

/// Identifier of a scheduled task; allocation order is registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(pub u64);

/// When a scheduled job runs relative to the tick it is due on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TaskPhase {
    /// Inside the clock, before the tick signal is emitted.
    PreTick,
    /// After the consumer has resolved and published the tick.
    Maintenance,
}

/// How often a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cadence {
    /// Fire once when `at` is reached, or on the next tick if `at` has
    /// already passed.
    Once {
        /// Target tick.
        at: u64,
    },
    /// Fire every `interval` ticks.
    Every {
        /// Ticks between runs.
        interval: u64,
        /// Tick of the last run (registration tick before the first run).
        last_run: u64,
    },
}

/// A job that failed or panicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    /// The failing task.
    pub task_id: TaskId,
    /// Label given at registration.
    pub label: String,
    /// Tick the job ran on.
    pub tick: u64,
    /// Error or panic message.
    pub message: String,
}

struct TaskRecord {
    label: String,
    cadence: Cadence,
    job: Job,
}

struct DueJob {
    id: TaskId,
    label: String,
    job: Job,
}

/// Tasks of one phase plus an index from due tick to task ids.
#[derive(Default)]
struct Schedule {
    tasks: BTreeMap<TaskId, TaskRecord>,
    due: BTreeMap<u64, BTreeSet<TaskId>>,
}

impl Schedule {
    fn insert(&mut self, id: TaskId, record: TaskRecord, due_at: u64) {
        self.tasks.insert(id, record);
        self.due.entry(due_at).or_default().insert(id);
    }

    /// Remove and return every task due at or before `tick`, in
    /// registration order, rescheduling recurring ones.
    fn take_due(&mut self, tick: u64) -> Vec<DueJob> {
        let keys: Vec<u64> = self.due.range(..=tick).map(|(at, _)| *at).collect();
        let mut ids = BTreeSet::new();
        for key in keys {
            if let Some(set) = self.due.remove(&key) {
                ids.extend(set);
            }
        }

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(record) = self.tasks.get_mut(&id) else {
                continue;
            };
            jobs.push(DueJob {
                id,
                label: record.label.clone(),
                job: Arc::clone(&record.job),
            });
            let recurring = match &mut record.cadence {
                Cadence::Once { .. } => None,
                Cadence::Every { interval, last_run } => {
                    *last_run = tick;
                    Some(*interval)
                }
            };
            if let Some(interval) = recurring {
                self.due
                    .entry(tick.saturating_add(interval))
                    .or_default()
                    .insert(id);
            } else {
                self.tasks.remove(&id);
            }
        }
        jobs
    }

    fn cancel(&mut self, id: TaskId) -> bool {
        if self.tasks.remove(&id).is_none() {
            return false;
        }
        self.due.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
        true
    }

    /// Drop one-shot tasks and rebase recurring ones onto tick 0.
    fn reset(&mut self) {
        self.tasks
            .retain(|_, record| matches!(record.cadence, Cadence::Every { .. }));
        self.due.clear();
        for (id, record) in &mut self.tasks {
            if let Cadence::Every { interval, last_run } = &mut record.cadence {
                *last_run = 0;
                self.due.entry(*interval).or_default().insert(*id);
            }
        }
    }
}

#[derive(Default)]
struct Schedules {
    next_id: u64,
    pre_tick: Schedule,
    maintenance: Schedule,
}

impl Schedules {
    const fn phase_mut(&mut self, phase: TaskPhase) -> &mut Schedule {
        match phase {
            TaskPhase::PreTick => &mut self.pre_tick,
            TaskPhase::Maintenance => &mut self.maintenance,
        }
    }

    const fn allocate(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Construction parameters for a [`SimulationClock`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClockConfig {
    /// Simulated time per tick and wall-clock interval at speed 1.0.
    pub tick_duration: Duration,
    /// Speed multiplier at start and after reset.
    pub initial_speed: f64,
    /// Whether the clock starts (and resets to) paused.
    pub start_paused: bool,
    /// Simulated time at tick 0.
    pub epoch: DateTime<Utc>,
    /// Tick signals buffered for the consumer.
    pub buffer: usize,
}

impl ClockConfig {
    /// Build a clock configuration from the YAML settings, with the epoch
    /// set to now.
    pub fn from_settings(settings: &ClockSettings) -> Self {
        Self {
            tick_duration: settings.tick_duration(),
            initial_speed: settings.initial_speed,
            start_paused: settings.start_paused,
            epoch: Utc::now(),
            buffer: settings.tick_buffer,
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::from_settings(&ClockSettings::default())
    }
}

struct Timeline {
    tick: u64,
    sim_time: DateTime<Utc>,
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives the simulation forward one tick at a time.
///
/// Created with [`SimulationClock::new`], which also returns the receiving
/// end of the tick channel. Exactly one consumer owns that receiver.
pub struct SimulationClock {
    tick_duration: Duration,
    delta: TimeDelta,
    initial_speed: f64,
    start_paused: bool,
    epoch: DateTime<Utc>,

    timeline: Mutex<Timeline>,
    schedules: Mutex<Schedules>,

    /// `f64` bits of the current speed multiplier.
    speed_bits: AtomicU64,
    paused: AtomicBool,
    resume_notify: Notify,

    /// Serializes tick emission between the driver task and `step`. Always
    /// taken before reserving a channel slot.
    emit: tokio::sync::Mutex<()>,
    ticks: mpsc::Sender<TickSignal>,
    driver: Mutex<Option<Driver>>,
}

impl SimulationClock {
    /// Create a stopped clock at tick 0 and the receiver for its signals.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] for a zero or out-of-range tick
    /// duration, a zero buffer, or an initial speed outside
    /// `[MIN_SPEED, MAX_SPEED]`.
    pub fn new(
        config: ClockConfig,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TickSignal>), ClockError> {
        if config.tick_duration.is_zero() {
            return Err(ClockError::InvalidConfig {
                reason: "tick_duration must be positive".to_owned(),
            });
        }
        if config.buffer == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "buffer must be at least 1".to_owned(),
            });
        }
        let speed = config.initial_speed;
        if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(ClockError::InvalidConfig {
                reason: format!("initial_speed must be in [{MIN_SPEED}, {MAX_SPEED}], got {speed}"),
            });
        }
        let delta = TimeDelta::from_std(config.tick_duration).map_err(|err| {
            ClockError::InvalidConfig {
                reason: format!("tick_duration out of range: {err}"),
            }
        })?;

        let (ticks, receiver) = mpsc::channel(config.buffer);
        let clock = Arc::new(Self {
            tick_duration: config.tick_duration,
            delta,
            initial_speed: speed,
            start_paused: config.start_paused,
            epoch: config.epoch,
            timeline: Mutex::new(Timeline {
                tick: 0,
                sim_time: config.epoch,
            }),
            schedules: Mutex::new(Schedules::default()),
            speed_bits: AtomicU64::new(speed.to_bits()),
            paused: AtomicBool::new(config.start_paused),
            resume_notify: Notify::new(),
            emit: tokio::sync::Mutex::new(()),
            ticks,
            driver: Mutex::new(None),
        });
        Ok((clock, receiver))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the driver task. Returns `false` if it was already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut driver = lock(&self.driver);
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).drive(cancel.clone()));
        *driver = Some(Driver { cancel, handle });
        info!(
            tick = self.current_tick(),
            paused = self.is_paused(),
            speed = self.speed(),
            "Clock started"
        );
        true
    }

    /// Stop the driver task. A tick that is already being emitted is
    /// delivered before this returns.
    pub async fn stop(&self) {
        let driver = lock(&self.driver).take();
        let Some(driver) = driver else {
            return;
        };
        driver.cancel.cancel();
        if let Err(err) = driver.handle.await {
            warn!(error = %err, "Clock driver task ended abnormally");
        }
        info!(tick = self.current_tick(), "Clock stopped");
    }

    /// Whether the driver task is running.
    pub fn is_running(&self) -> bool {
        lock(&self.driver)
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }

    /// Stop the clock and return it to tick 0 with its initial speed and
    /// pause state. One-shot tasks are discarded; recurring tasks are kept
    /// and fire `interval` ticks after the reset.
    pub async fn reset(&self) {
        self.stop().await;
        {
            let mut timeline = lock(&self.timeline);
            timeline.tick = 0;
            timeline.sim_time = self.epoch;
        }
        {
            let mut schedules = lock(&self.schedules);
            schedules.pre_tick.reset();
            schedules.maintenance.reset();
        }
        self.speed_bits
            .store(self.initial_speed.to_bits(), Ordering::Release);
        self.paused.store(self.start_paused, Ordering::Release);
        info!("Clock reset");
    }

    // -----------------------------------------------------------------------
    // Pause / Resume / Step
    // -----------------------------------------------------------------------

    /// Whether the clock is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause the clock. The tick counter is kept.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        debug!(tick = self.current_tick(), "Clock paused");
    }

    /// Resume the clock and wake the driver.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_one();
        debug!(tick = self.current_tick(), "Clock resumed");
    }

    /// Advance exactly one tick while paused, emitting its signal.
    ///
    /// Waits for room in the tick channel if the consumer is behind.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NotPaused`] while the clock is running,
    /// [`ClockError::ConsumerGone`] if the receiver was dropped, or
    /// [`ClockError::TickOverflow`] at the end of time.
    pub async fn step(&self) -> Result<TickInfo, ClockError> {
        if !self.is_paused() {
            return Err(ClockError::NotPaused);
        }
        let _emit = self.emit.lock().await;
        if !self.is_paused() {
            return Err(ClockError::NotPaused);
        }
        let Ok(permit) = self.ticks.reserve().await else {
            return Err(ClockError::ConsumerGone);
        };
        let signal = self.advance()?;
        let info = signal.info;
        permit.send(signal);
        debug!(tick = info.tick, "Clock stepped");
        Ok(info)
    }

    // -----------------------------------------------------------------------
    // Speed
    // -----------------------------------------------------------------------

    /// Current speed multiplier.
    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Acquire))
    }

    /// Set the speed multiplier, clamped to `[MIN_SPEED, MAX_SPEED]`.
    /// Takes effect from the next interval. Returns the applied value.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidSpeed`] for NaN or infinite values,
    /// leaving the speed unchanged.
    pub fn set_speed(&self, multiplier: f64) -> Result<f64, ClockError> {
        if !multiplier.is_finite() {
            return Err(ClockError::InvalidSpeed { value: multiplier });
        }
        let applied = multiplier.clamp(MIN_SPEED, MAX_SPEED);
        self.speed_bits.store(applied.to_bits(), Ordering::Release);
        debug!(requested = multiplier, applied, "Clock speed changed");
        Ok(applied)
    }

    /// Wall-clock gap between ticks at the current speed.
    pub fn interval(&self) -> Duration {
        self.tick_duration.div_f64(self.speed())
    }

    /// Simulated time per tick.
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    // -----------------------------------------------------------------------
    // Time queries
    // -----------------------------------------------------------------------

    /// Last emitted tick (0 before the first).
    pub fn current_tick(&self) -> u64 {
        lock(&self.timeline).tick
    }

    /// Simulated time of the last emitted tick.
    pub fn sim_time(&self) -> DateTime<Utc> {
        lock(&self.timeline).sim_time
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Run `job` once before tick `at`. A tick that has already passed fires
    /// on the next tick.
    pub fn schedule_at<F>(&self, at: u64, label: impl Into<String>, job: F) -> TaskId
    where
        F: Fn(&TickInfo) -> Result<(), JobError> + Send + Sync + 'static,
    {
        let label = label.into();
        let mut schedules = lock(&self.schedules);
        let id = schedules.allocate();
        debug!(task_id = id.0, label = %label, at, "Scheduled one-shot task");
        schedules.pre_tick.insert(
            id,
            TaskRecord {
                label,
                cadence: Cadence::Once { at },
                job: Arc::new(job),
            },
            at,
        );
        id
    }

    /// Run `job` before every `interval`-th tick, starting `interval` ticks
    /// after the current one.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidInterval`] if `interval` is 0.
    pub fn schedule_every<F>(
        &self,
        interval: u64,
        label: impl Into<String>,
        job: F,
    ) -> Result<TaskId, ClockError>
    where
        F: Fn(&TickInfo) -> Result<(), JobError> + Send + Sync + 'static,
    {
        self.register_recurring(TaskPhase::PreTick, interval, label.into(), Arc::new(job))
    }

    /// Like [`schedule_every`](Self::schedule_every), but the job runs in
    /// the maintenance phase, after the tick's results are published.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidInterval`] if `interval` is 0.
    pub fn schedule_maintenance<F>(
        &self,
        interval: u64,
        label: impl Into<String>,
        job: F,
    ) -> Result<TaskId, ClockError>
    where
        F: Fn(&TickInfo) -> Result<(), JobError> + Send + Sync + 'static,
    {
        self.register_recurring(TaskPhase::Maintenance, interval, label.into(), Arc::new(job))
    }

    fn register_recurring(
        &self,
        phase: TaskPhase,
        interval: u64,
        label: String,
        job: Job,
    ) -> Result<TaskId, ClockError> {
        if interval == 0 {
            return Err(ClockError::InvalidInterval { label });
        }
        let now = self.current_tick();
        let mut schedules = lock(&self.schedules);
        let id = schedules.allocate();
        debug!(task_id = id.0, label = %label, interval, ?phase, "Scheduled recurring task");
        schedules.phase_mut(phase).insert(
            id,
            TaskRecord {
                label,
                cadence: Cadence::Every {
                    interval,
                    last_run: now,
                },
                job,
            },
            now.saturating_add(interval),
        );
        Ok(id)
    }

    /// Remove a scheduled task. Returns `false` if it no longer exists.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let mut schedules = lock(&self.schedules);
        schedules.pre_tick.cancel(id) || schedules.maintenance.cancel(id)
    }

    /// Run every job of `phase` due at `info.tick`, in registration order.
    ///
    /// No lock is held while jobs run, so a job may schedule further tasks.
    pub fn run_due(&self, info: &TickInfo, phase: TaskPhase) -> Vec<TaskFailure> {
        let due = lock(&self.schedules).phase_mut(phase).take_due(info.tick);
        let mut failures = Vec::new();
        for task in due {
            let job = Arc::clone(&task.job);
            let message = match catch_unwind(AssertUnwindSafe(|| job(info))) {
                Ok(Ok(())) => {
                    debug!(tick = info.tick, label = %task.label, "Scheduled task ran");
                    continue;
                }
                Ok(Err(err)) => err.message,
                Err(payload) => panic_message(payload.as_ref()),
            };
            warn!(
                tick = info.tick,
                task_id = task.id.0,
                label = %task.label,
                error = %message,
                "Scheduled task failed"
            );
            failures.push(TaskFailure {
                task_id: task.id,
                label: task.label,
                tick: info.tick,
                message,
            });
        }
        failures
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn advance(&self) -> Result<TickSignal, ClockError> {
        let info = {
            let mut timeline = lock(&self.timeline);
            let overflow = ClockError::TickOverflow {
                tick: timeline.tick,
            };
            let Some(tick) = timeline.tick.checked_add(1) else {
                return Err(overflow);
            };
            let Some(sim_time) = timeline.sim_time.checked_add_signed(self.delta) else {
                return Err(overflow);
            };
            timeline.tick = tick;
            timeline.sim_time = sim_time;
            TickInfo {
                tick,
                sim_time,
                delta: self.tick_duration,
                wall_time: Utc::now(),
            }
        };
        let task_failures = self.run_due(&info, TaskPhase::PreTick);
        Ok(TickSignal {
            info,
            task_failures,
        })
    }

    async fn drive(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            while self.is_paused() {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = self.resume_notify.notified() => {}
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.interval()) => {}
            }

            // Same order as `step`: the emit lock, then a channel slot.
            let _emit = tokio::select! {
                () = cancel.cancelled() => return,
                guard = self.emit.lock() => guard,
            };
            if self.is_paused() {
                continue;
            }
            let permit = tokio::select! {
                () = cancel.cancelled() => return,
                permit = self.ticks.reserve() => {
                    if let Ok(permit) = permit {
                        permit
                    } else {
                        warn!("Tick consumer dropped, clock driver exiting");
                        return;
                    }
                }
            };
            if self.is_paused() {
                continue;
            }
            match self.advance() {
                Ok(signal) => permit.send(signal),
                Err(err) => {
                    error!(error = %err, "Clock driver halted");
                    return;
                }
            }
        }
    }
}

impl core::fmt::Debug for SimulationClock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulationClock")
            .field("tick", &self.current_tick())
            .field("speed", &self.speed())
            .field("paused", &self.is_paused())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn clock(start_paused: bool) -> (Arc<SimulationClock>, mpsc::Receiver<TickSignal>) {
        SimulationClock::new(ClockConfig {
            tick_duration: Duration::from_millis(100),
            initial_speed: 1.0,
            start_paused,
            epoch: DateTime::<Utc>::UNIX_EPOCH,
            buffer: 4,
        })
        .unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, impl Fn(&TickInfo) -> Result<(), JobError> + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |info: &TickInfo| {
            sink.lock().unwrap().push(info.tick);
            Ok(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_strictly_monotonic() {
        let (clock, mut rx) = clock(false);
        assert!(clock.start());

        let mut previous = 0;
        let mut last_time = DateTime::<Utc>::UNIX_EPOCH;
        for expected in 1..=5 {
            let signal = rx.recv().await.unwrap();
            assert_eq!(signal.info.tick, expected);
            assert!(signal.info.tick > previous);
            previous = signal.info.tick;
            assert_eq!(signal.info.delta, Duration::from_millis(100));
            last_time = signal.info.sim_time;
        }
        clock.stop().await;

        assert_eq!(last_time, DateTime::<Utc>::UNIX_EPOCH + TimeDelta::milliseconds(500));
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let (clock, _rx) = clock(true);
        assert!(clock.start());
        assert!(!clock.start());
        assert!(clock.is_running());
        clock.stop().await;
        assert!(!clock.is_running());
    }

    #[test]
    fn speed_is_clamped() {
        let (clock, _rx) = clock(true);
        assert!((clock.set_speed(0.05).unwrap() - MIN_SPEED).abs() < f64::EPSILON);
        assert!((clock.speed() - 0.1).abs() < f64::EPSILON);
        assert!((clock.set_speed(50.0).unwrap() - MAX_SPEED).abs() < f64::EPSILON);
        assert!((clock.speed() - 10.0).abs() < f64::EPSILON);
        assert_eq!(clock.interval(), Duration::from_millis(10));
    }

    #[test]
    fn non_finite_speed_is_rejected_without_mutation() {
        let (clock, _rx) = clock(true);
        clock.set_speed(2.0).unwrap();
        assert!(matches!(
            clock.set_speed(f64::NAN),
            Err(ClockError::InvalidSpeed { .. })
        ));
        assert!(clock.set_speed(f64::INFINITY).is_err());
        assert!((clock.speed() - 2.0).abs() < f64::EPSILON);
        assert_eq!(clock.interval(), Duration::from_millis(50));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = SimulationClock::new(ClockConfig {
            tick_duration: Duration::ZERO,
            ..ClockConfig::default()
        });
        assert!(matches!(result, Err(ClockError::InvalidConfig { .. })));

        let result = SimulationClock::new(ClockConfig {
            initial_speed: f64::NAN,
            ..ClockConfig::default()
        });
        assert!(matches!(result, Err(ClockError::InvalidConfig { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn step_is_rejected_while_running() {
        let (clock, _rx) = clock(false);
        clock.start();
        assert!(matches!(clock.step().await, Err(ClockError::NotPaused)));
        clock.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn step_while_paused_emits_exactly_one_signal() {
        let (clock, mut rx) = clock(true);
        clock.start();

        let info = clock.step().await.unwrap();
        assert_eq!(info.tick, 1);
        assert_eq!(rx.recv().await.unwrap().info.tick, 1);

        let extra = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(extra.is_err(), "paused clock emitted an extra tick");
        assert_eq!(clock.current_tick(), 1);
        clock.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn step_waits_out_a_full_channel_behind_the_driver() {
        let (clock, mut rx) = SimulationClock::new(ClockConfig {
            tick_duration: Duration::from_millis(100),
            initial_speed: 1.0,
            start_paused: false,
            epoch: DateTime::<Utc>::UNIX_EPOCH,
            buffer: 1,
        })
        .unwrap();
        clock.start();

        // Tick 1 fills the only slot; the driver then blocks on the next one.
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(clock.current_tick(), 1);

        clock.pause();
        let stepping = tokio::spawn({
            let clock = Arc::clone(&clock);
            async move { clock.step().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(rx.recv().await.unwrap().info.tick, 1);
        let stepped = tokio::time::timeout(Duration::from_secs(60), stepping).await;
        assert!(stepped.is_ok(), "step stalled behind the driver");
        let stepped = stepped.unwrap().unwrap().unwrap();
        assert_eq!(stepped.tick, 2);
        assert_eq!(rx.recv().await.unwrap().info.tick, 2);

        let extra = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(extra.is_err(), "paused clock emitted an extra tick");
        clock.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_keeps_counter_and_resume_continues() {
        let (clock, mut rx) = clock(false);
        clock.start();
        assert_eq!(rx.recv().await.unwrap().info.tick, 1);
        assert_eq!(rx.recv().await.unwrap().info.tick, 2);

        clock.pause();
        while let Ok(Some(_)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {}
        let paused_at = clock.current_tick();
        assert!(paused_at >= 2);

        clock.resume();
        let next = rx.recv().await.unwrap();
        assert_eq!(next.info.tick, paused_at + 1);
        clock.stop().await;
    }

    #[tokio::test]
    async fn one_shot_fires_once_and_past_ticks_fire_next() {
        let (clock, mut rx) = clock(true);
        let (seen, job) = recorder();
        clock.schedule_at(2, "at-two", job);

        for _ in 0..3 {
            clock.step().await.unwrap();
            rx.recv().await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![2]);

        let (late, job) = recorder();
        clock.schedule_at(1, "already-passed", job);
        clock.step().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(*late.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn recurring_task_fires_every_interval() {
        let (clock, mut rx) = clock(true);
        let (seen, job) = recorder();
        clock.schedule_every(3, "every-three", job).unwrap();

        for _ in 0..9 {
            clock.step().await.unwrap();
            rx.recv().await.unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![3, 6, 9]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let (clock, _rx) = clock(true);
        let result = clock.schedule_every(0, "never", |_: &TickInfo| Ok(()));
        assert!(matches!(result, Err(ClockError::InvalidInterval { .. })));
    }

    #[tokio::test]
    async fn failing_and_panicking_jobs_are_reported() {
        let (clock, mut rx) = clock(true);
        clock.schedule_at(1, "fails", |_: &TickInfo| Err(JobError::new("no luck")));
        clock.schedule_at(1, "panics", |_: &TickInfo| -> Result<(), JobError> {
            panic!("boom")
        });
        let (seen, job) = recorder();
        clock.schedule_at(1, "still-runs", job);

        clock.step().await.unwrap();
        let signal = rx.recv().await.unwrap();
        let reported: Vec<(&str, &str, u64)> = signal
            .task_failures
            .iter()
            .map(|f| (f.label.as_str(), f.message.as_str(), f.tick))
            .collect();
        assert_eq!(reported, vec![("fails", "no luck", 1), ("panics", "boom", 1)]);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn jobs_run_in_registration_order() {
        let (clock, mut rx) = clock(true);
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            clock.schedule_at(1, label, move |_: &TickInfo| {
                order.lock().unwrap().push(label);
                Ok(())
            });
        }
        clock.step().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn maintenance_jobs_only_run_on_request() {
        let (clock, mut rx) = clock(true);
        let (seen, job) = recorder();
        clock.schedule_maintenance(1, "upkeep", job).unwrap();

        let info = clock.step().await.unwrap();
        rx.recv().await.unwrap();
        assert!(seen.lock().unwrap().is_empty());

        let failures = clock.run_due(&info, TaskPhase::Maintenance);
        assert!(failures.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn cancelled_task_does_not_fire() {
        let (clock, mut rx) = clock(true);
        let (seen, job) = recorder();
        let id = clock.schedule_every(1, "cancel-me", job).unwrap();
        assert!(clock.cancel_task(id));
        assert!(!clock.cancel_task(id));
        clock.step().await.unwrap();
        rx.recv().await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_rewinds_and_drops_one_shots() {
        let (clock, mut rx) = clock(true);
        let (once, once_job) = recorder();
        let (every, every_job) = recorder();
        clock.schedule_at(10, "later", once_job);
        clock.schedule_every(2, "pulse", every_job).unwrap();
        clock.set_speed(4.0).unwrap();
        for _ in 0..3 {
            clock.step().await.unwrap();
            rx.recv().await.unwrap();
        }

        clock.reset().await;
        assert_eq!(clock.current_tick(), 0);
        assert_eq!(clock.sim_time(), DateTime::<Utc>::UNIX_EPOCH);
        assert!((clock.speed() - 1.0).abs() < f64::EPSILON);
        assert!(clock.is_paused());

        for _ in 0..10 {
            clock.step().await.unwrap();
            rx.recv().await.unwrap();
        }
        assert!(once.lock().unwrap().is_empty());
        assert_eq!(*every.lock().unwrap(), vec![2, 2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn step_without_consumer_fails() {
        let (clock, rx) = clock(true);
        drop(rx);
        assert!(matches!(clock.step().await, Err(ClockError::ConsumerGone)));
    }
}
