//! Echo handler: writes back whatever it reads.

use futures_util::future::BoxFuture;

use crate::net::connection::Connection;
use crate::pipeline::{HandlerResult, Next, NextHandler};

/// Registry ID of the echo handler.
pub const ECHO_HANDLER_ID: &str = "layer4.handlers.echo";

const BUFFER_SIZE: usize = 8 * 1024;

/// Terminal stage that echoes until the peer closes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl EchoHandler {
    pub async fn echo(&self, conn: &Connection) -> HandlerResult {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                tracing::debug!(connection_id = %conn.id(), bytes = total, "Peer finished sending");
                return Ok(());
            }
            conn.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }
}

impl NextHandler for EchoHandler {
    fn handle<'a>(&'a self, conn: &'a Connection, _next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.echo(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::StreamTransport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn echoes_until_eof() {
        let (local, mut remote) = tokio::io::duplex(64);
        let conn = Connection::new(StreamTransport::new(local));

        let task = {
            let conn = conn.clone();
            tokio::spawn(async move { EchoHandler.echo(&conn).await.map_err(|e| e.to_string()) })
        };

        remote.write_all(b"ping").await.unwrap();
        let mut back = [0u8; 4];
        remote.read_exact(&mut back).await.unwrap();
        assert_eq!(&back, b"ping");

        remote.shutdown().await.unwrap();
        assert_eq!(task.await.unwrap(), Ok(()));
    }
}
