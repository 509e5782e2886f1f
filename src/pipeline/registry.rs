//! Handler registry.
//!
//! Maps handler IDs (as written in the `[[chain]]` config) to constructors
//! that build a stage from its JSON options. The process-wide registry is
//! initialised once with the built-in handlers.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use thiserror::Error;

use crate::config::schema::{CheckConfig, StageConfig};
use crate::guard::{CheckHandler, CHECK_HANDLER_ID};
use crate::handlers::echo::{EchoHandler, ECHO_HANDLER_ID};
use crate::pipeline::{Chain, NextHandler};

/// Builds a stage from its options.
pub type Constructor = fn(&Value) -> Result<Arc<dyn NextHandler>, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown handler '{0}'")]
    UnknownHandler(String),

    #[error("handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("invalid options for handler '{id}': {source}")]
    InvalidOptions {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Name → constructor mapping.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.constructors.insert(CHECK_HANDLER_ID, build_check);
        registry.constructors.insert(ECHO_HANDLER_ID, build_echo);
        registry
    }

    pub fn register(&mut self, id: &'static str, constructor: Constructor) -> Result<(), RegistryError> {
        if self.constructors.contains_key(id) {
            return Err(RegistryError::DuplicateHandler(id.to_string()));
        }
        self.constructors.insert(id, constructor);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    /// Build a single stage.
    pub fn build(&self, id: &str, options: &Value) -> Result<Arc<dyn NextHandler>, RegistryError> {
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| RegistryError::UnknownHandler(id.to_string()))?;
        constructor(options)
    }

    /// Build a chain from its configured stages, in order.
    pub fn build_chain(&self, stages: &[StageConfig]) -> Result<Chain, RegistryError> {
        let mut built = Vec::with_capacity(stages.len());
        for stage in stages {
            built.push(self.build(&stage.handler, &stage.options_value())?);
        }

        if stages.last().is_some_and(|s| s.handler == CHECK_HANDLER_ID) {
            tracing::warn!("Chain ends with the check handler; connections will be closed immediately");
        }
        Ok(Chain::new(built))
    }
}

/// The process-wide registry.
pub fn global() -> &'static HandlerRegistry {
    static REGISTRY: OnceLock<HandlerRegistry> = OnceLock::new();
    REGISTRY.get_or_init(HandlerRegistry::with_builtins)
}

fn build_check(options: &Value) -> Result<Arc<dyn NextHandler>, RegistryError> {
    let config: CheckConfig =
        serde_json::from_value(options.clone()).map_err(|source| RegistryError::InvalidOptions {
            id: CHECK_HANDLER_ID.to_string(),
            source,
        })?;
    Ok(Arc::new(CheckHandler::new(config)))
}

fn build_echo(_options: &Value) -> Result<Arc<dyn NextHandler>, RegistryError> {
    Ok(Arc::new(EchoHandler))
}
