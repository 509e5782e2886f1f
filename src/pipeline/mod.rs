//! Handler chain subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → Chain::handle
//!     → stage[0].handle(conn, Next::Handler(rest))
//!     → stage[1].handle(conn, Next::Handler(rest))
//!     → ...
//!     → stage[n-1].handle(conn, Next::End)
//! ```
//!
//! # Design Decisions
//! - A stage decides whether and when to call `next`
//! - The end of the chain is an explicit `Next::End`, not a null handler
//! - Errors are opaque boxed errors; stages pass them through untouched

pub mod registry;

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::net::connection::Connection;

/// Opaque error returned by a handler.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Outcome of driving a connection through a handler.
pub type HandlerResult = Result<(), BoxError>;

/// The remainder of a chain, as seen by the stage in front of it.
pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, conn: &'a Connection) -> BoxFuture<'a, HandlerResult>;
}

/// A stage in a handler chain.
pub trait NextHandler: Send + Sync {
    fn handle<'a>(&'a self, conn: &'a Connection, next: Next<'a>) -> BoxFuture<'a, HandlerResult>;
}

/// What follows the current stage.
#[derive(Clone, Copy)]
pub enum Next<'a> {
    /// The rest of the chain.
    Handler(&'a dyn Handler),
    /// Nothing: the current stage is last.
    End,
}

impl<'a> Next<'a> {
    pub fn is_end(&self) -> bool {
        matches!(self, Next::End)
    }

    /// Hand the connection on. Handing on past the end is `Ok(())`.
    pub async fn handle(self, conn: &'a Connection) -> HandlerResult {
        match self {
            Next::Handler(handler) => handler.handle(conn).await,
            Next::End => Ok(()),
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Next::Handler(_) => f.write_str("Next::Handler"),
            Next::End => f.write_str("Next::End"),
        }
    }
}

/// An ordered list of stages.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<Arc<dyn NextHandler>>,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn NextHandler>>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Drive `conn` through every stage, starting with the first.
    pub async fn handle(&self, conn: &Connection) -> HandlerResult {
        Rest(&self.stages).handle(conn).await
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("stages", &self.stages.len()).finish()
    }
}

/// Stages not yet run.
struct Rest<'s>(&'s [Arc<dyn NextHandler>]);

impl Handler for Rest<'_> {
    fn handle<'a>(&'a self, conn: &'a Connection) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let Some((stage, remaining)) = self.0.split_first() else {
                return Ok(());
            };
            let rest = Rest(remaining);
            let next = if remaining.is_empty() {
                Next::End
            } else {
                Next::Handler(&rest)
            };
            stage.handle(conn, next).await
        })
    }
}
