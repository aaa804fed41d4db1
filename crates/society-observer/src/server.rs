//! Observer HTTP server lifecycle.
//!
//! Binding and serving are split: [`ObserverServer::bind`] claims the
//! socket up front so the engine fails at startup on a bad address, and
//! [`ObserverServer::serve`] runs until the shutdown token fires.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use society_core::config::InfrastructureConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Where the Observer listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host address, e.g. `0.0.0.0`.
    pub host: String,
    /// TCP port; 0 picks a free one.
    pub port: u16,
}

impl From<&InfrastructureConfig> for ServerConfig {
    fn from(infrastructure: &InfrastructureConfig) -> Self {
        Self {
            host: infrastructure.observer_host.clone(),
            port: infrastructure.observer_port,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&InfrastructureConfig::default())
    }
}

/// Errors from binding or running the Observer server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `host:port` is not a socket address.
    #[error("invalid observer address {address}: {source}")]
    Address {
        /// The rejected address.
        address: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },

    /// The listener could not be bound.
    #[error("failed to bind observer on {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: SocketAddr,
        /// I/O failure.
        source: std::io::Error,
    },

    /// Serving stopped with an I/O error.
    #[error("observer server failed: {source}")]
    Serve {
        /// I/O failure.
        source: std::io::Error,
    },
}

/// A bound, not yet serving, Observer server.
#[derive(Debug)]
pub struct ObserverServer {
    listener: TcpListener,
    router: Router,
    addr: SocketAddr,
}

impl ObserverServer {
    /// Bind the listener and build the router over `state`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Address`] for an unparsable address and
    /// [`ServerError::Bind`] if the port cannot be claimed.
    pub async fn bind(config: &ServerConfig, state: Arc<AppState>) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.host, config.port);
        let requested: SocketAddr = address
            .parse()
            .map_err(|source| ServerError::Address { address, source })?;

        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| ServerError::Bind {
                addr: requested,
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: requested,
            source,
        })?;

        Ok(Self {
            listener,
            router: build_router(state),
            addr,
        })
    }

    /// The address actually bound.
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve requests until `shutdown` is cancelled. Open `WebSocket`
    /// streams end when the bus shuts down.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`] on a fatal I/O error.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let addr = self.addr;
        info!(%addr, "Observer server listening");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|source| ServerError::Serve { source })?;
        info!(%addr, "Observer server stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use society_core::bus::{BusConfig, EventBus};
    use society_core::clock::{ClockConfig, SimulationClock};
    use society_core::orchestrator::{Orchestrator, OrchestratorConfig};

    use super::*;

    fn state() -> Arc<AppState> {
        let (clock, ticks) = SimulationClock::new(ClockConfig::default()).unwrap();
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        let orchestrator = Orchestrator::new(OrchestratorConfig::default(), clock, ticks, bus);
        Arc::new(AppState::new(Arc::new(orchestrator)))
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_stops_on_cancel() {
        let config = ServerConfig {
            host: String::from("127.0.0.1"),
            port: 0,
        };
        let server = ObserverServer::bind(&config, state()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);

        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(server.serve(shutdown.clone()));
        shutdown.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_malformed_address() {
        let config = ServerConfig {
            host: String::from("not a host"),
            port: 80,
        };
        let result = ObserverServer::bind(&config, state()).await;
        assert!(matches!(result, Err(ServerError::Address { .. })));
    }

    #[test]
    fn config_follows_infrastructure_section() {
        let infrastructure = InfrastructureConfig {
            observer_host: String::from("127.0.0.1"),
            observer_port: 9100,
            ..InfrastructureConfig::default()
        };
        let config = ServerConfig::from(&infrastructure);
        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "127.0.0.1");
    }
}
