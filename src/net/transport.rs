//! Transport abstraction over stream sockets.
//!
//! # Responsibilities
//! - Shared-reference read/write so several tasks can hold one connection
//! - Close both directions without consuming pending data
//! - Expose TCP-specific controls (keepalive, peek) when the stream has them
//!
//! # Design Decisions
//! - Poll-based methods on `&self`; async wrappers live on `Connection`
//! - `shutdown` is synchronous so it can run from `Drop`
//! - Non-TCP streams answer `None` from `as_tcp` and lose nothing else

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};

use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A byte stream a `Connection` can run on.
pub trait Transport: Send + Sync + 'static {
    /// Attempt to read into `buf`. An empty fill on `Ready(Ok)` means EOF.
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>>;

    /// Attempt to write from `buf`.
    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;

    /// Shut down both directions. Calling it on an already shut down stream is `Ok`.
    fn shutdown(&self) -> io::Result<()>;

    /// Remote address, if the stream has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// TCP controls, if the stream is a TCP socket.
    fn as_tcp(&self) -> Option<&TcpStream> {
        None
    }
}

fn shutdown_socket(sock: SockRef<'_>) -> io::Result<()> {
    match sock.shutdown(Shutdown::Both) {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        res => res,
    }
}

impl Transport for TcpStream {
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            ready!(self.poll_read_ready(cx))?;
            match self.try_read(buf.initialize_unfilled()) {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        loop {
            ready!(self.poll_write_ready(cx))?;
            match self.try_write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                res => return Poll::Ready(res),
            }
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        shutdown_socket(SockRef::from(self))
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn as_tcp(&self) -> Option<&TcpStream> {
        Some(self)
    }
}

#[cfg(unix)]
impl Transport for tokio::net::UnixStream {
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            ready!(self.poll_read_ready(cx))?;
            match self.try_read(buf.initialize_unfilled()) {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        loop {
            ready!(self.poll_write_ready(cx))?;
            match self.try_write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                res => return Poll::Ready(res),
            }
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        shutdown_socket(SockRef::from(self))
    }
}

/// Adapts any `AsyncRead + AsyncWrite` stream (TLS, in-memory duplex) to
/// [`Transport`].
///
/// The stream sits behind a mutex held only for the duration of a single
/// poll. `shutdown` drops the stream, which is how such streams signal EOF
/// to their peer.
#[derive(Debug)]
pub struct StreamTransport<T> {
    inner: Mutex<Option<T>>,
}

impl<T> StreamTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            inner: Mutex::new(Some(stream)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream already shut down")
}

impl<T> Transport for StreamTransport<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn poll_read(&self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.lock().as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.lock().as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(not_connected())),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        drop(self.lock().take());
        Ok(())
    }
}
