//! Scoped idle deadline.

use std::time::Duration;

use crate::net::connection::Connection;

/// Keeps an idle timeout armed on a connection for as long as it lives.
///
/// Dropping the guard clears the idle timeout and the read deadline, so a
/// later user of the same connection never inherits them.
#[derive(Debug)]
pub struct IdleDeadline<'a> {
    conn: &'a Connection,
}

impl<'a> IdleDeadline<'a> {
    /// Arm `idle` on `conn`. A zero duration arms nothing and returns `None`.
    pub fn arm(conn: &'a Connection, idle: Duration) -> Option<Self> {
        if idle.is_zero() {
            return None;
        }
        conn.set_idle_timeout(Some(idle));
        tracing::trace!(connection_id = %conn.id(), idle_ms = idle.as_millis() as u64, "Idle deadline armed");
        Some(Self { conn })
    }
}

impl Drop for IdleDeadline<'_> {
    fn drop(&mut self) {
        self.conn.set_idle_timeout(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::StreamTransport;

    fn connection() -> Connection {
        let (local, _remote) = tokio::io::duplex(16);
        Connection::new(StreamTransport::new(local))
    }

    #[tokio::test]
    async fn zero_arms_nothing() {
        let conn = connection();
        assert!(IdleDeadline::arm(&conn, Duration::ZERO).is_none());
        assert!(conn.read_deadline().is_none());
        assert!(conn.idle_timeout().is_none());
    }

    #[tokio::test]
    async fn drop_clears_deadline() {
        let conn = connection();
        {
            let _guard = IdleDeadline::arm(&conn, Duration::from_secs(5)).unwrap();
            let armed = conn.read_deadline().unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            conn.refresh_deadline();
            assert!(conn.read_deadline().unwrap() > armed);
            assert_eq!(conn.idle_timeout(), Some(Duration::from_secs(5)));
        }
        assert!(conn.read_deadline().is_none());
        assert!(conn.idle_timeout().is_none());
    }
}
