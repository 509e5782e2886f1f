//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tokio::io::ReadBuf;
use tokio::net::{TcpListener, TcpStream};

use l4_check::config::{CheckConfig, MonitorMode};
use l4_check::net::{Connection, Transport};
use l4_check::pipeline::{Handler, HandlerResult};
use l4_check::CheckHandler;

/// A connected loopback pair: (server side, client side).
pub async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (server, client)
}

/// TCP transport that counts how often it is shut down.
pub struct CountingTransport {
    inner: TcpStream,
    shutdowns: Arc<AtomicUsize>,
}

impl CountingTransport {
    pub fn new(inner: TcpStream) -> (Self, Arc<AtomicUsize>) {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let transport = Self {
            inner,
            shutdowns: Arc::clone(&shutdowns),
        };
        (transport, shutdowns)
    }
}

impl Transport for CountingTransport {
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Transport::poll_read(&self.inner, cx, buf)
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Transport::poll_write(&self.inner, cx, buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Transport::shutdown(&self.inner)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Transport::peer_addr(&self.inner)
    }

    fn as_tcp(&self) -> Option<&TcpStream> {
        Some(&self.inner)
    }
}

/// A server-side connection over a counting transport, plus the client socket.
pub async fn counted_connection() -> (Connection, TcpStream, Arc<AtomicUsize>) {
    let (server, client) = tcp_pair().await;
    let (transport, shutdowns) = CountingTransport::new(server);
    (Connection::new(transport), client, shutdowns)
}

pub fn check_handler(idle_timeout_ms: u64, monitor: MonitorMode) -> CheckHandler {
    CheckHandler::new(CheckConfig {
        idle_timeout_ms,
        monitor,
        peek_interval_ms: 50,
        ..CheckConfig::default()
    })
}

pub type DownstreamFn = for<'a> fn(&'a Connection) -> BoxFuture<'a, HandlerResult>;

/// Downstream handler backed by a plain function.
pub struct Downstream(pub DownstreamFn);

impl Handler for Downstream {
    fn handle<'a>(&'a self, conn: &'a Connection) -> BoxFuture<'a, HandlerResult> {
        (self.0)(conn)
    }
}

/// Echo until the peer sends EOF.
pub fn echo_until_eof(conn: &Connection) -> BoxFuture<'_, HandlerResult> {
    Box::pin(echo(conn))
}

async fn echo(conn: &Connection) -> HandlerResult {
    let mut buf = [0u8; 256];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        conn.write_all(&buf[..n]).await?;
    }
}

/// Block on a read and surface whatever it returns.
pub fn read_once(conn: &Connection) -> BoxFuture<'_, HandlerResult> {
    Box::pin(read_some(conn))
}

async fn read_some(conn: &Connection) -> HandlerResult {
    let mut buf = [0u8; 16];
    conn.read(&mut buf).await?;
    Ok(())
}

/// Never read; wait for someone else to close the connection.
pub fn wait_for_close(conn: &Connection) -> BoxFuture<'_, HandlerResult> {
    Box::pin(until_closed(conn))
}

async fn until_closed(conn: &Connection) -> HandlerResult {
    conn.closed().await;
    Ok(())
}
