//! Connection lifecycle guard.
//!
//! # Data Flow
//! ```text
//! CheckHandler::check(conn, next)
//!     → keepalive.rs (TCP keepalive, no-op elsewhere)
//!     → deadline.rs (arm idle deadline, scoped)
//!     → Next::End? close and return Ok
//!     → next.handle(conn)  ┐ joined
//!       monitor.rs (peek)  ┘
//!     → clear deadline → close once → return downstream result
//!
//! Invocation states:
//!     Init → CapabilityConfigured → DeadlineArmed → [MonitorRunning]
//!          → Forwarding → MonitorStopped → Closed
//! ```
//!
//! # Design Decisions
//! - Every exit path ends with the connection closed, panics included
//! - The downstream error is returned as is
//! - The monitor never reads, so it cannot steal bytes from the forwarder
//! - No task outlives the invocation: the monitor is joined, not spawned

pub mod deadline;
pub mod keepalive;
pub mod monitor;

use futures_util::future::BoxFuture;
use tracing::Instrument;

use crate::config::schema::{CheckConfig, MonitorMode};
use crate::net::connection::{CloseReason, Connection};
use crate::pipeline::{BoxError, HandlerResult, Next, NextHandler};

use self::deadline::IdleDeadline;
use self::keepalive::configure_keepalive;
use self::monitor::{LivenessMonitor, MonitorTracker};

/// Registry ID of the check handler.
pub const CHECK_HANDLER_ID: &str = "layer4.handlers.check";

/// Guards one connection's trip through the rest of the chain.
#[derive(Debug)]
pub struct CheckHandler {
    config: CheckConfig,
    monitors: MonitorTracker,
}

impl CheckHandler {
    pub fn new(config: CheckConfig) -> Self {
        Self {
            config,
            monitors: MonitorTracker::new(),
        }
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Number of liveness monitors currently running for this handler.
    pub fn active_monitors(&self) -> usize {
        self.monitors.running()
    }

    /// Run `next` on `conn` under the guard, then close `conn`.
    pub async fn check(&self, conn: &Connection, next: Next<'_>) -> HandlerResult {
        let span = tracing::debug_span!(
            "check",
            connection_id = %conn.id(),
            peer_addr = ?conn.peer_addr(),
        );
        self.run(conn, next).instrument(span).await
    }

    async fn run(&self, conn: &Connection, next: Next<'_>) -> HandlerResult {
        let close = CloseOnExit::new(conn);

        configure_keepalive(conn, self.config.keepalive_period());
        let deadline = IdleDeadline::arm(conn, self.config.idle_timeout());

        let Next::Handler(next) = next else {
            tracing::debug!("No downstream handler, closing connection");
            drop(deadline);
            close.finish(CloseReason::NoDownstream);
            return Ok(());
        };

        let monitor = match self.config.monitor {
            MonitorMode::Peek => {
                let monitor = LivenessMonitor::new(conn, self.config.peek_interval(), &self.monitors);
                if monitor.is_none() {
                    tracing::debug!("Transport cannot be peeked, using deadline only");
                }
                monitor
            }
            MonitorMode::Passive => None,
        };

        let result = match monitor {
            Some((handle, monitor)) => {
                let forward = async {
                    let result = next.handle(conn).await;
                    handle.stop();
                    result
                };
                let (result, _exit) = tokio::join!(forward, monitor.run());
                result
            }
            None => next.handle(conn).await,
        };

        drop(deadline);
        close.finish(outcome_reason(&result));

        if let Err(e) = &result {
            tracing::debug!(error = %e, "Downstream handler failed");
        }
        result
    }
}

impl NextHandler for CheckHandler {
    fn handle<'a>(&'a self, conn: &'a Connection, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.check(conn, next))
    }
}

/// Close reason implied by how the downstream handler finished.
fn outcome_reason(result: &HandlerResult) -> CloseReason {
    match result {
        Ok(()) => CloseReason::Finished,
        Err(e) => match downcast_io(e) {
            Some(io_err) => CloseReason::from_read_error(io_err),
            None => CloseReason::Finished,
        },
    }
}

fn downcast_io(err: &BoxError) -> Option<&std::io::Error> {
    err.downcast_ref::<std::io::Error>()
}

/// Closes the connection when dropped unless [`finish`](Self::finish) ran first.
struct CloseOnExit<'a> {
    conn: &'a Connection,
    armed: bool,
}

impl<'a> CloseOnExit<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self { conn, armed: true }
    }

    fn finish(mut self, reason: CloseReason) {
        self.armed = false;
        close(self.conn, reason);
    }
}

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        if self.armed {
            close(self.conn, CloseReason::Aborted);
        }
    }
}

fn close(conn: &Connection, reason: CloseReason) {
    if let Err(e) = conn.close_with(reason) {
        tracing::debug!(connection_id = %conn.id(), error = %e, "Error while closing connection");
    }
}
