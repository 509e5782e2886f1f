//! Process lifecycle.
//!
//! ```text
//! startup.rs   metrics → handler chain → listener (bound last)
//! signals.rs   Ctrl+C / SIGTERM → Shutdown::trigger
//! shutdown.rs  trigger → accept loop exits → drain with timeout
//! ```
//!
//! Connections still open when the drain timeout elapses are left to the
//! runtime to drop on exit.

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
