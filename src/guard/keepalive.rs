//! TCP keepalive configuration.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};

use crate::net::connection::Connection;
use crate::observability::metrics;

/// Result of [`configure_keepalive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keepalive {
    /// Keepalive is on.
    Applied,
    /// The transport has no keepalive concept.
    Unsupported,
    /// The socket refused the option. Already logged.
    Failed,
}

impl Keepalive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Keepalive::Applied => "applied",
            Keepalive::Unsupported => "unsupported",
            Keepalive::Failed => "failed",
        }
    }
}

fn keepalive_params(period: Duration) -> TcpKeepalive {
    let params = TcpKeepalive::new().with_time(period);
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "windows"))]
    let params = params.with_interval(period);
    params
}

/// Turn on TCP keepalive for `conn`.
///
/// With `period`, both the idle time before the first probe and the probe
/// interval are set to it; without, the platform defaults apply. Anything
/// that is not a TCP socket is left alone.
pub fn configure_keepalive(conn: &Connection, period: Option<Duration>) -> Keepalive {
    let Some(transport) = conn.transport() else {
        return Keepalive::Unsupported;
    };
    let Some(tcp) = transport.as_tcp() else {
        tracing::trace!(connection_id = %conn.id(), "Transport has no keepalive, skipping");
        return Keepalive::Unsupported;
    };

    let sock = SockRef::from(tcp);
    let res = match period {
        Some(period) => sock.set_tcp_keepalive(&keepalive_params(period)),
        None => sock.set_keepalive(true),
    };

    let outcome = match res {
        Ok(()) => Keepalive::Applied,
        Err(e) => {
            tracing::warn!(connection_id = %conn.id(), error = %e, "Failed to set TCP keepalive");
            Keepalive::Failed
        }
    };
    metrics::record_keepalive(outcome.as_str());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::StreamTransport;
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_connection() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Connection::new(server), client)
    }

    fn keepalive_on(conn: &Connection) -> bool {
        let transport = conn.transport().unwrap();
        SockRef::from(transport.as_tcp().unwrap()).keepalive().unwrap()
    }

    #[tokio::test]
    async fn enables_keepalive_with_platform_default() {
        let (conn, _client) = tcp_connection().await;
        assert!(!keepalive_on(&conn));

        assert_eq!(configure_keepalive(&conn, None), Keepalive::Applied);
        assert!(keepalive_on(&conn));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn sets_probe_timing_from_period() {
        let (conn, _client) = tcp_connection().await;

        assert_eq!(
            configure_keepalive(&conn, Some(Duration::from_secs(15))),
            Keepalive::Applied
        );
        let transport = conn.transport().unwrap();
        let sock = SockRef::from(transport.as_tcp().unwrap());
        assert!(sock.keepalive().unwrap());
        assert_eq!(sock.keepalive_time().unwrap(), Duration::from_secs(15));
        assert_eq!(sock.keepalive_interval().unwrap(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn non_tcp_transport_is_a_no_op() {
        let (local, _remote) = tokio::io::duplex(16);
        let conn = Connection::new(StreamTransport::new(local));
        assert_eq!(configure_keepalive(&conn, Some(Duration::from_secs(5))), Keepalive::Unsupported);
    }

    #[tokio::test]
    async fn closed_connection_is_a_no_op() {
        let (conn, _client) = tcp_connection().await;
        conn.close().unwrap();
        assert_eq!(configure_keepalive(&conn, None), Keepalive::Unsupported);
    }
}
