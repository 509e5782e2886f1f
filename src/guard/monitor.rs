//! Peek-based liveness monitor.
//!
//! # Responsibilities
//! - Notice peer FIN and RST while the forwarder is busy elsewhere
//! - Reclaim the connection when the idle deadline passes
//! - Refresh the idle deadline when new bytes arrive
//!
//! # Design Decisions
//! - Never consumes data: `TcpStream::peek` only, so the forwarder sees every byte
//! - Runs inside the invocation's own task and is joined before it returns
//! - Re-peeks on an interval while data sits unread instead of spinning
//! - Non-TCP transports get no monitor

use std::future::pending;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, Instant};

use crate::net::connection::{CloseReason, Connection};
use crate::observability::metrics;

/// Bytes looked at by the first peek. The window doubles whenever a peek fills
/// it, up to the socket's receive buffer size.
const PEEK_WINDOW: usize = 4096;

/// Window cap used when the receive buffer size cannot be read.
const MAX_PEEK_WINDOW: usize = 4 * 1024 * 1024;

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Told to stop because the downstream handler returned.
    Stopped,
    /// Someone else closed the connection first.
    Closed,
    /// The monitor closed the connection for this reason.
    Reclaimed(CloseReason),
}

impl MonitorExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorExit::Stopped => "stopped",
            MonitorExit::Closed => "closed",
            MonitorExit::Reclaimed(reason) => reason.as_str(),
        }
    }
}

/// Counts monitors currently running.
#[derive(Debug, Clone, Default)]
pub struct MonitorTracker {
    running: Arc<AtomicUsize>,
}

impl MonitorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self) -> MonitorGuard {
        self.running.fetch_add(1, Ordering::SeqCst);
        MonitorGuard {
            running: Arc::clone(&self.running),
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

/// Marks one monitor as running until dropped.
#[derive(Debug)]
struct MonitorGuard {
    running: Arc<AtomicUsize>,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stops a running monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    stop: oneshot::Sender<()>,
}

impl MonitorHandle {
    pub fn stop(self) {
        let _ = self.stop.send(());
    }
}

/// Per-invocation monitor state.
#[derive(Debug)]
pub struct LivenessMonitor {
    conn: Connection,
    interval: Duration,
    stop: oneshot::Receiver<()>,
    last_activity: Instant,
    /// Bytes read by the forwarder plus bytes waiting in the socket, as of the last peek.
    seen: u64,
    _running: MonitorGuard,
}

impl LivenessMonitor {
    /// Prepare a monitor for `conn`. Returns `None` if the transport cannot be peeked.
    pub fn new(
        conn: &Connection,
        interval: Duration,
        tracker: &MonitorTracker,
    ) -> Option<(MonitorHandle, LivenessMonitor)> {
        conn.transport()?.as_tcp()?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = LivenessMonitor {
            conn: conn.clone(),
            interval,
            stop: stop_rx,
            last_activity: Instant::now(),
            seen: conn.bytes_read(),
            _running: tracker.track(),
        };
        Some((MonitorHandle { stop: stop_tx }, monitor))
    }

    /// Watch the connection until stopped or until it is closed.
    pub async fn run(mut self) -> MonitorExit {
        let exit = self.watch().await;
        tracing::trace!(
            connection_id = %self.conn.id(),
            exit = exit.as_str(),
            idle_for_ms = self.last_activity.elapsed().as_millis() as u64,
            "Liveness monitor exited"
        );
        metrics::record_monitor_exit(exit.as_str());
        exit
    }

    async fn watch(&mut self) -> MonitorExit {
        let Some(transport) = self.conn.transport() else {
            return MonitorExit::Closed;
        };
        let Some(tcp) = transport.as_tcp() else {
            return MonitorExit::Closed;
        };
        let mut control = self.conn.watch_control();
        let mut buf = vec![0u8; PEEK_WINDOW];
        let mut pending_bytes = 0usize;

        loop {
            let state = *control.borrow_and_update();
            if state.closed.is_some() {
                return MonitorExit::Closed;
            }

            tokio::select! {
                biased;
                _ = &mut self.stop => return MonitorExit::Stopped,
                _ = control.changed() => continue,
                _ = expire(state.deadline) => {
                    return self.reclaim(CloseReason::IdleTimeout);
                }
                res = peek(tcp, &mut buf, pending_bytes, self.interval) => match res {
                    Ok(0) => return self.reclaim(CloseReason::PeerClosed),
                    Ok(n) => {
                        pending_bytes = n;
                        self.observe(n);
                        if n == buf.len() {
                            widen(&mut buf, tcp);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(connection_id = %self.conn.id(), error = %e, "Peek failed");
                        return self.reclaim(CloseReason::from_read_error(&e));
                    }
                },
            }
        }
    }

    /// Refresh the deadline if bytes arrived since the previous peek.
    fn observe(&mut self, pending_bytes: usize) {
        let seen = self.conn.bytes_read() + pending_bytes as u64;
        if seen > self.seen {
            self.seen = seen;
            self.last_activity = Instant::now();
            self.conn.refresh_deadline();
        }
    }

    fn reclaim(&self, reason: CloseReason) -> MonitorExit {
        tracing::debug!(connection_id = %self.conn.id(), reason = reason.as_str(), "Reclaiming connection");
        if let Err(e) = self.conn.close_with(reason) {
            tracing::debug!(connection_id = %self.conn.id(), error = %e, "Close failed");
        }
        MonitorExit::Reclaimed(reason)
    }
}

/// Grow a window that the last peek filled. Unread data never exceeds the
/// receive buffer, so a window of that size sees every arrival.
fn widen(buf: &mut Vec<u8>, tcp: &TcpStream) -> bool {
    let limit = SockRef::from(tcp)
        .recv_buffer_size()
        .unwrap_or(MAX_PEEK_WINDOW)
        .max(PEEK_WINDOW);
    if buf.len() >= limit {
        return false;
    }
    let len = buf.len().saturating_mul(2).min(limit);
    buf.resize(len, 0);
    true
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

/// Peek the socket. With data already waiting, wait `interval` first, since
/// readiness would fire again at once.
async fn peek(tcp: &TcpStream, buf: &mut [u8], pending_bytes: usize, interval: Duration) -> io::Result<usize> {
    if pending_bytes > 0 {
        sleep(interval).await;
    }
    tcp.peek(buf).await
}
