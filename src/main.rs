//! l4-check server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ server (task per connection)
//!                                     │
//!                                     ▼
//!                              pipeline::Chain
//!                        ┌────────────┴────────────┐
//!                        ▼                         ▼
//!                  guard::CheckHandler ──next──▶ handlers::echo
//!                  keepalive, idle deadline,
//!                  liveness monitor, close once
//! ```

use std::path::PathBuf;

use clap::Parser;

use l4_check::config::loader::{load_config, ConfigError};
use l4_check::config::validation::validate_config;
use l4_check::config::AppConfig;
use l4_check::lifecycle::{signals, startup, Shutdown};
use l4_check::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "l4-check")]
#[command(author, version, about = "Layer-4 server with idle connection checks")]
struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

fn load(args: &CliArgs) -> Result<AppConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    if let Some(listen) = &args.listen {
        config.listener.bind_address = listen.clone();
    }
    if let Some(level) = &args.log_level {
        config.observability.log_level = level.clone();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config = load(&args)?;

    logging::init(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        stages = config.chain.len(),
        "l4-check starting"
    );

    let (server, listener) = startup::start(&config).await?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown);

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
