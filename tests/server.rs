//! End-to-end tests through the accept loop.

mod common;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use l4_check::config::{AppConfig, StageConfig};
use l4_check::guard::CHECK_HANDLER_ID;
use l4_check::handlers::echo::ECHO_HANDLER_ID;
use l4_check::net::listener::Listener;
use l4_check::pipeline::registry;
use l4_check::{Server, Shutdown};

fn config(idle_timeout_ms: u64) -> AppConfig {
    AppConfig {
        chain: vec![
            StageConfig::new(CHECK_HANDLER_ID).with_option("idle_timeout_ms", idle_timeout_ms),
            StageConfig::new(ECHO_HANDLER_ID),
        ],
        ..AppConfig::default()
    }
}

async fn local_listener(max_connections: usize) -> Listener {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    Listener::from_listener(listener, max_connections)
}

#[tokio::test]
async fn echoes_then_closes_idle_client() {
    let listener = local_listener(16).await;
    let addr = listener.local_addr().unwrap();
    let server = Server::from_config(&config(200)).unwrap();
    let tracker = server.tracker();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    // Silent from here on: the server should hang up.
    let mut rest = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    tokio::time::timeout(Duration::from_secs(2), tracker.wait_idle())
        .await
        .unwrap();
    assert_eq!(tracker.active_count(), 0);

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_connections_up_to_drain_timeout() {
    let listener = local_listener(16).await;
    let addr = listener.local_addr().unwrap();
    let chain = registry::global().build_chain(&config(0).chain).unwrap();
    let server = Server::new(chain, Duration::from_millis(200));
    let tracker = server.tracker();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hi").await.unwrap();
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(tracker.active_count(), 1);

    let started = tokio::time::Instant::now();
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(tracker.active_count(), 1);
    drop(client);
}

#[tokio::test]
async fn shutdown_finishes_once_clients_leave() {
    let listener = local_listener(16).await;
    let addr = listener.local_addr().unwrap();
    let server = Server::from_config(&config(0)).unwrap();
    let tracker = server.tracker();
    let shutdown = Shutdown::new();
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"bye").await.unwrap();
    let mut buf = [0u8; 3];
    client.read_exact(&mut buf).await.unwrap();

    shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(tracker.active_count(), 0);
}
