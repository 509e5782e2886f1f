//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → transport.rs (shared-reference stream access, TCP capability lookup)
//!     → connection.rs (deadline, close-once state, tracking)
//!     → Hand off to the handler chain
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - A connection is closed at most once; later closes are no-ops

pub mod connection;
pub mod listener;
pub mod transport;

pub use connection::{is_deadline_exceeded, CloseReason, ConnError, Connection, ConnectionId};
pub use transport::{StreamTransport, Transport};
