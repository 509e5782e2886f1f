//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → chain stages built once through the handler registry
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; handlers share it read-only
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Stage options stay untyped until the registry hands them to a constructor

pub mod duration;
pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AppConfig;
pub use schema::CheckConfig;
pub use schema::ListenerConfig;
pub use schema::MonitorMode;
pub use schema::StageConfig;
