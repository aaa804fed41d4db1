//! Configuration loading and typed config structures for the Society simulation.
//!
//! The canonical configuration lives in `society-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, a loader that reads the file, and [`SimulationConfig::validate`]
//! which rejects values the simulation cannot run with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bus::{BusConfig, OverflowPolicy};
use crate::clock::{MAX_SPEED, MIN_SPEED};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside the range the simulation can run with.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `society-config.yaml`. Every field has a
/// default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// World-level settings.
    #[serde(default)]
    pub world: WorldConfig,

    /// Clock cadence settings.
    #[serde(default)]
    pub clock: ClockSettings,

    /// Tick loop settings.
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Event bus settings.
    #[serde(default)]
    pub bus: BusSettings,

    /// Periodic maintenance settings.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Network endpoints and storage paths.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `NATS_URL` overrides `infrastructure.nats_url`
    /// - `OBSERVER_PORT` overrides `infrastructure.observer_port`
    /// - `JOURNAL_DIR` overrides `infrastructure.journal_dir`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.infrastructure.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides
    /// are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the simulation unable to run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock.tick_duration_ms == 0 {
            return Err(invalid("clock.tick_duration_ms", "must be at least 1"));
        }
        let speed = self.clock.initial_speed;
        if !speed.is_finite() || !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(invalid(
                "clock.initial_speed",
                format!("must be a finite value in [{MIN_SPEED}, {MAX_SPEED}], got {speed}"),
            ));
        }
        if self.clock.tick_buffer == 0 {
            return Err(invalid("clock.tick_buffer", "must be at least 1"));
        }
        if self.orchestrator.max_concurrent_decisions == 0 {
            return Err(invalid("orchestrator.max_concurrent_decisions", "must be at least 1"));
        }
        if self.orchestrator.decision_timeout_ms == 0 {
            return Err(invalid("orchestrator.decision_timeout_ms", "must be at least 1"));
        }
        if self.bus.queue_capacity == 0 {
            return Err(invalid("bus.queue_capacity", "must be at least 1"));
        }
        if self.bus.subscriber_capacity == 0 {
            return Err(invalid("bus.subscriber_capacity", "must be at least 1"));
        }
        let chance = self.maintenance.random_event_chance;
        if !chance.is_finite() || !(0.0..=1.0).contains(&chance) {
            return Err(invalid(
                "maintenance.random_event_chance",
                format!("must be in [0, 1], got {chance}"),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable simulation name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
        }
    }
}

/// Clock cadence configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClockSettings {
    /// Wall-clock milliseconds per tick at speed 1.0; also the simulated
    /// time advanced per tick.
    #[serde(default = "default_tick_duration_ms")]
    pub tick_duration_ms: u64,

    /// Speed multiplier at start and after reset.
    #[serde(default = "default_speed")]
    pub initial_speed: f64,

    /// Whether the clock starts paused.
    #[serde(default = "default_true")]
    pub start_paused: bool,

    /// Tick signals buffered between the clock and the tick loop.
    #[serde(default = "default_tick_buffer")]
    pub tick_buffer: usize,
}

impl ClockSettings {
    /// Tick duration as a [`Duration`].
    pub const fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_duration_ms)
    }
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            tick_duration_ms: default_tick_duration_ms(),
            initial_speed: default_speed(),
            start_paused: true,
            tick_buffer: default_tick_buffer(),
        }
    }
}

/// Tick loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrchestratorSettings {
    /// Upper bound on decision calls in flight at once.
    #[serde(default = "default_max_concurrent_decisions")]
    pub max_concurrent_decisions: usize,

    /// Milliseconds an agent has to decide before it is treated as idle.
    #[serde(default = "default_decision_timeout_ms")]
    pub decision_timeout_ms: u64,

    /// Milliseconds the dialogue composer has per interaction.
    #[serde(default = "default_compose_timeout_ms")]
    pub compose_timeout_ms: u64,

    /// Recent events included in each agent's context.
    #[serde(default = "default_context_event_window")]
    pub context_event_window: usize,

    /// Checkpoint every N ticks (0 disables checkpoints).
    #[serde(default = "default_snapshot_interval_ticks")]
    pub snapshot_interval_ticks: u64,

    /// Whether denied intents are published as events.
    #[serde(default)]
    pub broadcast_denials: bool,

    /// Publish attempts per event before it is dropped under backpressure.
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_decisions: default_max_concurrent_decisions(),
            decision_timeout_ms: default_decision_timeout_ms(),
            compose_timeout_ms: default_compose_timeout_ms(),
            context_event_window: default_context_event_window(),
            snapshot_interval_ticks: default_snapshot_interval_ticks(),
            broadcast_denials: false,
            publish_attempts: default_publish_attempts(),
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusSettings {
    /// Events that may wait for dispatch before publish fails fast.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-subscriber mailbox capacity.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// What a full mailbox does with new events.
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Maximum events retained in the history log (unbounded when absent).
    #[serde(default)]
    pub history_limit: Option<usize>,
}

impl BusSettings {
    /// Convert into the bus runtime configuration.
    pub const fn to_bus_config(&self) -> BusConfig {
        BusConfig {
            queue_capacity: self.queue_capacity,
            mailbox_capacity: self.subscriber_capacity,
            overflow: self.overflow,
            history_limit: self.history_limit,
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
            overflow: OverflowPolicy::default(),
            history_limit: None,
        }
    }
}

/// Periodic maintenance configuration. Intervals of 0 disable a task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MaintenanceConfig {
    /// Ticks between memory consolidation passes.
    #[serde(default = "default_memory_consolidation_interval")]
    pub memory_consolidation_interval: u64,

    /// Ticks between mood decay passes.
    #[serde(default = "default_mood_decay_interval")]
    pub mood_decay_interval: u64,

    /// Multiplicative mood intensity retained per decay pass.
    #[serde(default = "default_mood_decay_factor")]
    pub mood_decay_factor: f64,

    /// Ticks between random world event rolls.
    #[serde(default = "default_random_event_interval")]
    pub random_event_interval: u64,

    /// Probability that a roll produces a world event.
    #[serde(default = "default_random_event_chance")]
    pub random_event_chance: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            memory_consolidation_interval: default_memory_consolidation_interval(),
            mood_decay_interval: default_mood_decay_interval(),
            mood_decay_factor: default_mood_decay_factor(),
            random_event_interval: default_random_event_interval(),
            random_event_chance: default_random_event_chance(),
        }
    }
}

/// Network endpoints and storage paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// Address the observer API binds to.
    #[serde(default = "default_observer_host")]
    pub observer_host: String,

    /// Observer dashboard port.
    #[serde(default = "default_observer_port")]
    pub observer_port: u16,

    /// NATS messaging URL for externally hosted agents.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Directory for the JSON-lines event journal.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: PathBuf,
}

impl InfrastructureConfig {
    /// Override infrastructure values with environment variables when set.
    ///
    /// Unparseable `OBSERVER_PORT` values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = val;
        }
        if let Some(port) = std::env::var("OBSERVER_PORT").ok().and_then(|v| v.parse().ok()) {
            self.observer_port = port;
        }
        if let Ok(val) = std::env::var("JOURNAL_DIR") {
            self.journal_dir = PathBuf::from(val);
        }
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            observer_host: default_observer_host(),
            observer_port: default_observer_port(),
            nats_url: default_nats_url(),
            journal_dir: default_journal_dir(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_world_name() -> String {
    "Society".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_tick_duration_ms() -> u64 {
    1000
}

const fn default_speed() -> f64 {
    1.0
}

const fn default_tick_buffer() -> usize {
    4
}

const fn default_max_concurrent_decisions() -> usize {
    16
}

const fn default_decision_timeout_ms() -> u64 {
    5000
}

const fn default_compose_timeout_ms() -> u64 {
    5000
}

const fn default_context_event_window() -> usize {
    20
}

const fn default_snapshot_interval_ticks() -> u64 {
    100
}

const fn default_publish_attempts() -> u32 {
    3
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_subscriber_capacity() -> usize {
    256
}

const fn default_memory_consolidation_interval() -> u64 {
    50
}

const fn default_mood_decay_interval() -> u64 {
    10
}

const fn default_mood_decay_factor() -> f64 {
    0.9
}

const fn default_random_event_interval() -> u64 {
    25
}

const fn default_random_event_chance() -> f64 {
    0.1
}

fn default_observer_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_observer_port() -> u16 {
    8080
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("data/journal")
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.world.seed, 42);
        assert!(config.clock.start_paused);
        assert_eq!(config.clock.tick_duration(), Duration::from_secs(1));
        assert_eq!(config.bus.overflow, OverflowPolicy::DropNewest);
        assert!(config.bus.history_limit.is_none());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = SimulationConfig::parse("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
world:
  name: "Test Town"
  seed: 7

clock:
  tick_duration_ms: 250
  initial_speed: 2.5
  start_paused: false
  tick_buffer: 8

orchestrator:
  max_concurrent_decisions: 4
  decision_timeout_ms: 1500
  compose_timeout_ms: 800
  context_event_window: 5
  snapshot_interval_ticks: 10
  broadcast_denials: true
  publish_attempts: 5

bus:
  queue_capacity: 64
  subscriber_capacity: 16
  overflow: drop_oldest
  history_limit: 1000

maintenance:
  memory_consolidation_interval: 20
  mood_decay_interval: 5
  mood_decay_factor: 0.5
  random_event_interval: 0
  random_event_chance: 0.25

infrastructure:
  observer_host: "127.0.0.1"
  observer_port: 9000
  nats_url: "nats://nats:4222"
  journal_dir: "/tmp/society"

logging:
  level: debug
  format: json
"#;
        let config = SimulationConfig::parse(yaml).unwrap();
        assert_eq!(config.world.name, "Test Town");
        assert_eq!(config.clock.tick_duration_ms, 250);
        assert!(!config.clock.start_paused);
        assert_eq!(config.orchestrator.max_concurrent_decisions, 4);
        assert!(config.orchestrator.broadcast_denials);
        assert_eq!(config.bus.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.bus.history_limit, Some(1000));
        assert_eq!(config.maintenance.random_event_interval, 0);
        assert_eq!(config.infrastructure.observer_port, 9000);
        assert_eq!(config.infrastructure.journal_dir, PathBuf::from("/tmp/society"));
        assert_eq!(config.logging.format, LogFormat::Json);

        let bus = config.bus.to_bus_config();
        assert_eq!(bus.mailbox_capacity, 16);
        assert_eq!(bus.queue_capacity, 64);
    }

    #[test]
    fn zero_tick_duration_is_rejected() {
        let err = SimulationConfig::parse("clock:\n  tick_duration_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "clock.tick_duration_ms", .. }));
    }

    #[test]
    fn out_of_range_speed_is_rejected() {
        let err = SimulationConfig::parse("clock:\n  initial_speed: 20.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "clock.initial_speed", .. }));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let err = SimulationConfig::parse("clock: [unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
