//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection lifecycle events:
//!     → logging.rs (structured log events, one span per guarded invocation)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every connection event carries its `connection_id`
//! - Metrics are cheap (atomic increments) and off unless enabled

pub mod logging;
pub mod metrics;
