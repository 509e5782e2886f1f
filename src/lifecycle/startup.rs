//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialise metrics
//! - Build the handler chain from validated configuration
//! - Bind the listener last, so traffic arrives only when ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use thiserror::Error;

use crate::config::AppConfig;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;
use crate::pipeline::registry::RegistryError;
use crate::server::Server;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build handler chain: {0}")]
    Chain(#[from] RegistryError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Bring up every subsystem described by `config`.
pub async fn start(config: &AppConfig) -> Result<(Server, Listener), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = Server::from_config(config)?;
    let listener = Listener::bind(&config.listener).await?;
    Ok((server, listener))
}
