//! Accept loop driving connections through the handler chain.
//!
//! # Responsibilities
//! - Accept connections within the listener's connection limit
//! - Run each connection through the chain on its own task
//! - Track live connections and drain them on shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::AppConfig;
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{CloseReason, Connection, ConnectionTracker};
use crate::net::listener::{ConnectionPermit, Listener};
use crate::observability::metrics;
use crate::pipeline::registry::{self, RegistryError};
use crate::pipeline::Chain;

/// Pause after a failed accept (e.g. out of descriptors) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Layer-4 server.
pub struct Server {
    chain: Arc<Chain>,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl Server {
    pub fn new(chain: Chain, drain_timeout: Duration) -> Self {
        Self {
            chain: Arc::new(chain),
            tracker: ConnectionTracker::new(),
            drain_timeout,
        }
    }

    /// Build the chain from `config` through the global handler registry.
    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        let chain = registry::global().build_chain(&config.chain)?;
        Ok(Self::new(
            chain,
            Duration::from_secs(config.lifecycle.drain_timeout_secs),
        ))
    }

    /// Tracker of connections currently in the chain.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until `shutdown` fires, then wait for open connections to finish.
    pub async fn run(self, listener: Listener, mut shutdown: ShutdownSignal) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, stages = self.chain.len(), "Server starting");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => self.spawn_connection(stream, peer_addr, permit),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown.wait() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }
        drop(listener);

        let active = self.tracker.active_count();
        if active > 0 {
            tracing::info!(active, timeout_secs = self.drain_timeout.as_secs(), "Draining connections");
            if tokio::time::timeout(self.drain_timeout, self.tracker.wait_idle())
                .await
                .is_err()
            {
                tracing::warn!(
                    remaining = self.tracker.active_count(),
                    "Drain timeout elapsed with connections still open"
                );
            }
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr, permit: ConnectionPermit) {
        let chain = Arc::clone(&self.chain);
        let guard = self.tracker.track();
        metrics::record_connection_accepted();

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let conn = Connection::new(stream);

            match chain.handle(&conn).await {
                Ok(()) => tracing::debug!(connection_id = %conn.id(), peer_addr = %peer_addr, "Connection finished"),
                Err(e) => tracing::debug!(
                    connection_id = %conn.id(),
                    peer_addr = %peer_addr,
                    error = %e,
                    "Connection ended with error"
                ),
            }

            // Chains without a check stage leave closing to us.
            if let Err(e) = conn.close_with(CloseReason::Finished) {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Error while closing connection");
            }
        });
    }
}
