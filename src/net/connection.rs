//! Connection handle, close-once state and lifecycle tracking.
//!
//! # Responsibilities
//! - Wrap a transport in a cloneable handle with read deadline and idle timeout
//! - Enforce close-exactly-once through an atomic closed flag
//! - Record why a connection was closed
//! - Generate unique connection IDs for tracing
//! - Count live connections for graceful shutdown

use std::fmt;
use std::future::{pending, poll_fn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{ready, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::io::ReadBuf;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use crate::net::transport::Transport;
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a connection was closed. Only the first close is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The downstream handler returned.
    Finished,
    /// The chain ended at the guard with nothing to forward to.
    NoDownstream,
    /// No read activity within the idle timeout.
    IdleTimeout,
    /// The peer sent FIN.
    PeerClosed,
    /// The peer sent RST.
    PeerReset,
    /// The invocation unwound or was dropped before finishing.
    Aborted,
    /// Closed through [`Connection::close`].
    Local,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Finished => "finished",
            CloseReason::NoDownstream => "no_downstream",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::PeerReset => "peer_reset",
            CloseReason::Aborted => "aborted",
            CloseReason::Local => "local",
        }
    }

    /// Classify a failed read.
    pub fn from_read_error(err: &io::Error) -> Self {
        if is_deadline_exceeded(err) {
            return CloseReason::IdleTimeout;
        }
        match err.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                CloseReason::PeerReset
            }
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => CloseReason::PeerClosed,
            _ => CloseReason::Finished,
        }
    }

    /// Error handed to readers that arrive after the connection was closed.
    fn read_error(self) -> io::Error {
        match self {
            CloseReason::IdleTimeout => ConnError::DeadlineExceeded.into(),
            _ => ConnError::Closed.into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the connection itself rather than the transport.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnError {
    /// The read deadline passed before data arrived.
    #[error("read deadline exceeded")]
    DeadlineExceeded,

    /// The connection was closed locally.
    #[error("use of closed connection")]
    Closed,
}

impl From<ConnError> for io::Error {
    fn from(err: ConnError) -> Self {
        let kind = match err {
            ConnError::DeadlineExceeded => io::ErrorKind::TimedOut,
            ConnError::Closed => io::ErrorKind::NotConnected,
        };
        io::Error::new(kind, err)
    }
}

/// Returns true if `err` is a read deadline expiry raised by a [`Connection`].
pub fn is_deadline_exceeded(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<ConnError>())
        .is_some_and(|e| *e == ConnError::DeadlineExceeded)
}

/// State every reader and writer watches.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Control {
    pub(crate) deadline: Option<Instant>,
    pub(crate) idle: Option<Duration>,
    pub(crate) closed: Option<CloseReason>,
}

struct Shared {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    closed: AtomicBool,
    control: watch::Sender<Control>,
    bytes_read: AtomicU64,
}

/// An open byte stream moving through a handler chain.
///
/// Cloning is cheap and every clone refers to the same connection. Reads
/// honour the read deadline; closing wakes every blocked reader and writer.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("peer_addr", &self.shared.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

impl Connection {
    pub fn new<T: Transport>(transport: T) -> Self {
        let peer_addr = transport.peer_addr();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (control, _) = watch::channel(Control::default());
        Self {
            shared: Arc::new(Shared {
                id: ConnectionId::new(),
                peer_addr,
                transport: Mutex::new(Some(transport)),
                closed: AtomicBool::new(false),
                control,
                bytes_read: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    /// The underlying transport, or `None` once closed.
    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.shared
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn watch_control(&self) -> watch::Receiver<Control> {
        self.shared.control.subscribe()
    }

    fn transport_or_closed(&self) -> io::Result<Arc<dyn Transport>> {
        match self.transport() {
            Some(transport) => Ok(transport),
            None => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> io::Error {
        self.close_reason()
            .unwrap_or(CloseReason::Local)
            .read_error()
    }

    /// Read into `buf`, returning 0 on EOF.
    ///
    /// Fails with [`ConnError::DeadlineExceeded`] once the read deadline
    /// passes and with [`ConnError::Closed`] once the connection is closed.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut control = self.watch_control();
        loop {
            let state = *control.borrow_and_update();
            if let Some(reason) = state.closed {
                return Err(reason.read_error());
            }
            if state.deadline.is_some_and(|at| Instant::now() >= at) {
                return Err(ConnError::DeadlineExceeded.into());
            }
            let transport = self.transport_or_closed()?;

            tokio::select! {
                res = poll_fn(|cx| {
                    let mut rb = ReadBuf::new(&mut buf[..]);
                    ready!(transport.poll_read(cx, &mut rb))?;
                    Poll::Ready(Ok::<_, io::Error>(rb.filled().len()))
                }) => {
                    let n = res?;
                    if n > 0 {
                        self.record_read(n);
                    }
                    return Ok(n);
                }
                _ = expire(state.deadline) => {
                    return Err(ConnError::DeadlineExceeded.into());
                }
                _ = control.changed() => continue,
            }
        }
    }

    /// Write some of `buf`, returning how many bytes were accepted.
    pub async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut control = self.watch_control();
        loop {
            if control.borrow_and_update().closed.is_some() {
                return Err(ConnError::Closed.into());
            }
            let transport = self.transport_or_closed()?;

            tokio::select! {
                res = poll_fn(|cx| transport.poll_write(cx, buf)) => return res,
                _ = control.changed() => continue,
            }
        }
    }

    pub async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    fn record_read(&self, n: usize) {
        self.shared.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        self.refresh_deadline();
    }

    /// Total bytes handed to readers so far.
    pub fn bytes_read(&self) -> u64 {
        self.shared.bytes_read.load(Ordering::Relaxed)
    }

    /// Set an absolute read deadline. `None` disables it.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.shared.control.send_modify(|c| c.deadline = deadline);
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.shared.control.borrow().deadline
    }

    /// Set a sliding idle timeout: the deadline moves to `now + idle` now and
    /// after every successful read. `None` clears both idle timeout and deadline.
    pub fn set_idle_timeout(&self, idle: Option<Duration>) {
        self.shared.control.send_modify(|c| {
            c.idle = idle;
            c.deadline = idle.map(|d| Instant::now() + d);
        });
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.shared.control.borrow().idle
    }

    /// Push the deadline to `now + idle` if an idle timeout is set.
    pub fn refresh_deadline(&self) {
        self.shared.control.send_if_modified(|c| match c.idle {
            Some(idle) => {
                c.deadline = Some(Instant::now() + idle);
                true
            }
            None => false,
        });
    }

    /// Close the connection. Closing twice is `Ok`.
    pub fn close(&self) -> io::Result<()> {
        self.close_with(CloseReason::Local)
    }

    /// Close the connection, recording `reason` if this call is the first.
    ///
    /// Only the first call shuts the transport down; later calls return `Ok(())`.
    pub fn close_with(&self, reason: CloseReason) -> io::Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let transport = self
            .shared
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shared.control.send_modify(|c| c.closed = Some(reason));

        tracing::debug!(
            connection_id = %self.shared.id,
            reason = reason.as_str(),
            bytes_read = self.bytes_read(),
            "Connection closed"
        );
        metrics::record_connection_closed(reason);

        match transport {
            Some(transport) => transport.shutdown(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.control.borrow().closed
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut control = self.watch_control();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = control.wait_for(|c| c.closed.is_some()).await;
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|n| *n += 1);
        metrics::set_active_connections(self.active_count());
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until every tracked connection is gone.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        metrics::set_active_connections(*self.active.borrow());
    }
}
