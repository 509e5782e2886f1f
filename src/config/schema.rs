//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Handler chain every accepted connection runs through, in order.
    pub chain: Vec<StageConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Startup and shutdown settings.
    pub lifecycle: LifecycleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            chain: vec![
                StageConfig::new(crate::guard::CHECK_HANDLER_ID),
                StageConfig::new(crate::handlers::echo::ECHO_HANDLER_ID),
            ],
            observability: ObservabilityConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9000").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// One stage of the handler chain.
///
/// Every key besides `handler` is passed to the handler's constructor.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StageConfig {
    /// Registered handler ID (e.g., "layer4.handlers.check").
    pub handler: String,

    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl StageConfig {
    pub fn new(handler: &str) -> Self {
        Self {
            handler: handler.to_string(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn options_value(&self) -> Value {
        Value::Object(self.options.clone())
    }
}

/// How the check handler watches for dead peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// No monitor; the idle deadline trips the forwarder's next read.
    #[default]
    Passive,
    /// Peek at the socket without consuming data to catch FIN, RST and idleness.
    Peek,
}

/// Options of the `layer4.handlers.check` stage.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    /// Maximum time without read activity, in milliseconds. 0 disables it.
    pub idle_timeout_ms: u64,

    /// `idle_timeout_ms` as a duration string (`"5s"`). Wins when set.
    #[serde(with = "duration", skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<Duration>,

    /// TCP keepalive period in milliseconds. 0 keeps the platform default.
    pub keepalive_period_ms: u64,

    /// `keepalive_period_ms` as a duration string. Wins when set.
    #[serde(with = "duration", skip_serializing_if = "Option::is_none")]
    pub keepalive_period: Option<Duration>,

    /// Liveness monitoring strategy.
    pub monitor: MonitorMode,

    /// How often the peek monitor looks again while data sits unread.
    pub peek_interval_ms: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 0,
            idle_timeout: None,
            keepalive_period_ms: 0,
            keepalive_period: None,
            monitor: MonitorMode::Passive,
            peek_interval_ms: 250,
        }
    }
}

impl CheckConfig {
    /// Effective idle timeout. Zero means no deadline.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
            .unwrap_or(Duration::from_millis(self.idle_timeout_ms))
    }

    /// `None` means keepalive with platform default timing.
    pub fn keepalive_period(&self) -> Option<Duration> {
        let period = self
            .keepalive_period
            .unwrap_or(Duration::from_millis(self.keepalive_period_ms));
        (!period.is_zero()).then_some(period)
    }

    pub fn peek_interval(&self) -> Duration {
        Duration::from_millis(self.peek_interval_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Startup and shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long to wait for open connections after a shutdown signal.
    pub drain_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
        }
    }
}
