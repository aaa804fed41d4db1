//! Engine binary for the Society simulation.
//!
//! This is the main entry point that wires together the clock, event bus,
//! orchestrator, seed agents, maintenance jobs, journal, and the Observer
//! API. It loads configuration, initializes all subsystems, and runs the
//! simulation until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `society-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Create the event bus and the simulation clock
//! 4. Open the journal and build the orchestrator
//! 5. Start the event recorder
//! 6. Register maintenance jobs
//! 7. Connect to NATS if agents are NATS-backed
//! 8. Register seed agents
//! 9. Start the Observer API server
//! 10. Start the tick loop and wait for Ctrl-C
//! 11. Shut down in reverse order

mod agents;
mod error;
mod journal;
mod maintenance;
mod nats_agent;
mod spawner;

use std::path::Path;
use std::sync::Arc;

use society_core::bus::EventBus;
use society_core::clock::{ClockConfig, SimulationClock};
use society_core::config::{LogFormat, LoggingConfig, SimulationConfig};
use society_core::orchestrator::{Orchestrator, OrchestratorConfig};
use society_core::persistence::{Persistence, spawn_event_recorder};
use society_observer::{AppState, ObserverServer, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::journal::Journal;
use crate::nats_agent::NatsAgent;
use crate::spawner::{AgentKind, AgentsConfig, EngineSpawner};

/// Configuration file looked up in the working directory.
const CONFIG_FILE: &str = "society-config.yaml";

/// Largest batch the event recorder hands to the journal at once.
const RECORDER_BATCH_SIZE: usize = 64;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        world_name = config.world.name,
        seed = config.world.seed,
        tick_duration_ms = config.clock.tick_duration_ms,
        start_paused = config.clock.start_paused,
        "society-engine starting"
    );

    // 3. Create the event bus and the clock.
    let bus = Arc::new(EventBus::new(config.bus.to_bus_config()));
    let (clock, ticks) = SimulationClock::new(ClockConfig::from_settings(&config.clock))?;
    info!(speed = clock.speed(), paused = clock.is_paused(), "Clock initialized");

    // 4. Open the journal and build the orchestrator.
    let journal = Arc::new(Journal::open(&config.infrastructure.journal_dir).await?);
    let orchestrator = Arc::new(
        Orchestrator::new(
            OrchestratorConfig::from(&config.orchestrator),
            clock,
            ticks,
            Arc::clone(&bus),
        )
        .with_persistence(Arc::clone(&journal) as Arc<dyn Persistence>),
    );
    info!(journal_dir = %journal.dir().display(), "Orchestrator created");

    // 5. Start the event recorder.
    let shutdown = CancellationToken::new();
    let recorder = spawn_event_recorder(
        &bus,
        journal,
        RECORDER_BATCH_SIZE,
        shutdown.child_token(),
    )?;

    // 6. Register maintenance jobs.
    maintenance::register(&orchestrator, &config.maintenance, config.world.seed)?;

    // 7. Connect to NATS if agents need it.
    let agents_config = load_agents_config()?;
    let nats = if agents_config.kind == AgentKind::Nats {
        let url = &config.infrastructure.nats_url;
        info!(nats_url = url, "Connecting to NATS");
        let client = NatsAgent::connect(url)
            .await
            .map_err(|e| EngineError::Nats {
                message: e.to_string(),
            })?;
        info!("NATS connected");
        Some(client)
    } else {
        None
    };

    // 8. Register seed agents.
    let spawner = Arc::new(EngineSpawner::new(agents_config, config.world.seed, nats));
    for agent in spawner.seed_agents()? {
        orchestrator.register_agent(agent).await?;
    }
    info!(
        agents = orchestrator.list_agents().await.len(),
        "Seed agents registered"
    );

    // 9. Start the Observer API server.
    let app_state = Arc::new(AppState::new(Arc::clone(&orchestrator)).with_spawner(spawner));
    let observer = ObserverServer::bind(&ServerConfig::from(&config.infrastructure), app_state)
        .await
        .map_err(|e| EngineError::Observer {
            message: e.to_string(),
        })?;
    info!(addr = %observer.local_addr(), "Observer API bound");
    let server = tokio::spawn(observer.serve(shutdown.child_token()));

    // 10. Start the tick loop and wait for Ctrl-C.
    orchestrator.start().await?;
    info!(
        paused = orchestrator.world_state().await.paused,
        "Simulation running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // 11. Shut down: tick loop and bus first, then the server and recorder.
    orchestrator.shutdown().await;
    shutdown.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(EngineError::Observer {
                message: e.to_string(),
            });
        }
        Err(e) => warn!(error = %e, "Observer server task failed"),
    }
    if let Err(e) = recorder.await {
        warn!(error = %e, "Event recorder task failed");
    }

    let status = orchestrator.status().await;
    info!(
        ticks = status.clock_tick,
        uptime_seconds = status.uptime_seconds,
        "society-engine shutdown complete"
    );
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `logging.level` when set.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Load the main simulation configuration from `society-config.yaml`.
///
/// Looks for the config file relative to the current working directory.
fn load_config() -> Result<SimulationConfig, EngineError> {
    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        Ok(SimulationConfig::from_file(config_path)?)
    } else {
        Ok(SimulationConfig::default())
    }
}

/// Load the `agents` section from `society-config.yaml`.
///
/// If the file does not exist or lacks the `agents` key, defaults are used.
fn load_agents_config() -> Result<AgentsConfig, EngineError> {
    let config_path = Path::new(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(AgentsConfig::default());
    }

    let contents = std::fs::read_to_string(config_path).map_err(|e| EngineError::Spawner {
        message: format!("failed to read config file: {e}"),
    })?;
    let raw: serde_yml::Value = serde_yml::from_str(&contents).map_err(|e| EngineError::Spawner {
        message: format!("failed to parse config YAML: {e}"),
    })?;

    raw.get("agents").map_or_else(
        || Ok(AgentsConfig::default()),
        |agents| {
            serde_yml::from_value(agents.clone()).map_err(|e| EngineError::Spawner {
                message: format!("failed to parse agents config: {e}"),
            })
        },
    )
}
