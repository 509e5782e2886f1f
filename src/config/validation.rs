//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every chain stage names a registered handler
//! - Validate check handler options and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{AppConfig, CheckConfig, MonitorMode};
use crate::guard::CHECK_HANDLER_ID;
use crate::pipeline::registry;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("listener.max_connections must be greater than 0")]
    ZeroMaxConnections,

    #[error("chain must contain at least one handler")]
    EmptyChain,

    #[error("chain[{index}]: unknown handler '{handler}'")]
    UnknownHandler { index: usize, handler: String },

    #[error("chain[{index}]: {message}")]
    InvalidStage { index: usize, message: String },

    #[error("unknown log level '{0}'")]
    InvalidLogLevel(String),
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }

    if config.chain.is_empty() {
        errors.push(ValidationError::EmptyChain);
    }
    let registry = registry::global();
    for (index, stage) in config.chain.iter().enumerate() {
        if !registry.contains(&stage.handler) {
            errors.push(ValidationError::UnknownHandler {
                index,
                handler: stage.handler.clone(),
            });
            continue;
        }
        if stage.handler == CHECK_HANDLER_ID {
            match serde_json::from_value::<CheckConfig>(stage.options_value()) {
                Ok(check) if check.monitor == MonitorMode::Peek && check.peek_interval_ms == 0 => {
                    errors.push(ValidationError::InvalidStage {
                        index,
                        message: "peek_interval_ms must be greater than 0".to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) => errors.push(ValidationError::InvalidStage {
                    index,
                    message: e.to_string(),
                }),
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }
    if !LOG_LEVELS.contains(&config.observability.log_level.as_str()) {
        errors.push(ValidationError::InvalidLogLevel(config.observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::StageConfig;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = AppConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.listener.max_connections = 0;
        config.observability.log_level = "loud".into();
        config.chain = vec![
            StageConfig::new(CHECK_HANDLER_ID)
                .with_option("monitor", "peek")
                .with_option("peek_interval_ms", 0),
            StageConfig::new("layer4.handlers.tls"),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::ZeroMaxConnections));
        assert!(errors.contains(&ValidationError::UnknownHandler {
            index: 1,
            handler: "layer4.handlers.tls".into(),
        }));
        assert!(errors.contains(&ValidationError::InvalidLogLevel("loud".into())));
    }

    #[test]
    fn rejects_bad_check_options() {
        let mut config = AppConfig::default();
        config.chain[0] = StageConfig::new(CHECK_HANDLER_ID).with_option("idle_timeout_ms", -5);

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidStage { index: 0, .. }));
    }

    #[test]
    fn empty_chain_is_rejected() {
        let mut config = AppConfig::default();
        config.chain.clear();
        assert_eq!(validate_config(&config), Err(vec![ValidationError::EmptyChain]));
    }
}
