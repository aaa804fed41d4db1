//! Agent spawner for seeding the simulation and serving `POST /api/agents`.
//!
//! At startup the spawner creates `seed_count` agents named
//! `{name_prefix}-01`, `{name_prefix}-02`, ... of the configured kind. The
//! same spawner is handed to the Observer so operators can add agents while
//! the simulation runs.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use society_core::decision::Agent;
use society_observer::{AgentSpawner, SpawnError, SpawnRequest};
use society_types::AgentId;
use tracing::info;

use crate::agents::{WanderConfig, WanderingAgent};
use crate::error::EngineError;
use crate::nats_agent::NatsAgent;

// -----------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------

/// Which implementation backs spawned agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Local seeded random agents.
    #[default]
    Wander,
    /// Decisions requested from an external runner over NATS.
    Nats,
}

impl FromStr for AgentKind {
    type Err = SpawnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wander" => Ok(Self::Wander),
            "nats" => Ok(Self::Nats),
            other => Err(SpawnError::new(format!("unknown agent kind: {other}"))),
        }
    }
}

/// The `agents` section of `society-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentsConfig {
    /// Number of agents registered before the loop starts.
    #[serde(default = "default_seed_count")]
    pub seed_count: u32,

    /// Kind used for seed agents and for API requests that omit one.
    #[serde(default)]
    pub kind: AgentKind,

    /// Prefix for generated seed agent ids.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Tuning for wandering agents.
    #[serde(default)]
    pub wander: WanderConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            seed_count: default_seed_count(),
            kind: AgentKind::default(),
            name_prefix: default_name_prefix(),
            wander: WanderConfig::default(),
        }
    }
}

const fn default_seed_count() -> u32 {
    4
}

fn default_name_prefix() -> String {
    String::from("agent")
}

// -----------------------------------------------------------------------
// Spawner
// -----------------------------------------------------------------------

/// Builds [`WanderingAgent`]s and [`NatsAgent`]s.
///
/// Every wandering agent gets its own RNG seeded from the world seed plus
/// a spawn counter, so a run with the same seed and the same spawn order
/// repeats exactly.
pub struct EngineSpawner {
    config: AgentsConfig,
    wander: Arc<WanderConfig>,
    seed: u64,
    spawned: AtomicU64,
    nats: Option<async_nats::Client>,
}

impl EngineSpawner {
    /// Create a spawner. `nats` is required for [`AgentKind::Nats`].
    pub fn new(config: AgentsConfig, seed: u64, nats: Option<async_nats::Client>) -> Self {
        let wander = Arc::new(config.wander.clone());
        Self {
            config,
            wander,
            seed,
            spawned: AtomicU64::new(0),
            nats,
        }
    }

    /// Build the configured number of seed agents.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawner`] if an agent cannot be built, for
    /// example NATS agents without a connection.
    pub fn seed_agents(&self) -> Result<Vec<Arc<dyn Agent>>, EngineError> {
        let mut agents = Vec::new();
        for n in 1..=self.config.seed_count {
            let id = AgentId::new(format!("{}-{n:02}", self.config.name_prefix));
            let agent = self
                .build(id, self.config.kind)
                .map_err(|e| EngineError::Spawner { message: e.message })?;
            agents.push(agent);
        }

        info!(
            count = agents.len(),
            kind = ?self.config.kind,
            "Seed agents created"
        );
        Ok(agents)
    }

    fn build(&self, id: AgentId, kind: AgentKind) -> Result<Arc<dyn Agent>, SpawnError> {
        match kind {
            AgentKind::Wander => {
                let index = self.spawned.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(WanderingAgent::new(
                    id,
                    Arc::clone(&self.wander),
                    self.seed.wrapping_add(index),
                )))
            }
            AgentKind::Nats => {
                let client = self
                    .nats
                    .clone()
                    .ok_or_else(|| SpawnError::new("NATS agents require a NATS connection"))?;
                Ok(Arc::new(NatsAgent::new(id, client)))
            }
        }
    }
}

impl AgentSpawner for EngineSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<Arc<dyn Agent>, SpawnError> {
        let id = request.id.trim();
        if id.is_empty() {
            return Err(SpawnError::new("agent id must not be empty"));
        }
        let kind = match request.kind.as_deref() {
            Some(kind) => kind.parse()?,
            None => self.config.kind,
        };
        self.build(AgentId::from(id), kind)
    }
}

impl std::fmt::Debug for EngineSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSpawner")
            .field("config", &self.config)
            .field("seed", &self.seed)
            .field("nats", &self.nats.is_some())
            .finish_non_exhaustive()
    }
}
