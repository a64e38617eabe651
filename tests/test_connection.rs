use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use wicket::config::Config;
use wicket::http::connection::{Connection, ConnectionContext};
use wicket::server::ShutdownHandle;
use wicket::site::files::StaticFiles;

fn context(root: &std::path::Path) -> Arc<ConnectionContext<StaticFiles>> {
    let mut cfg = Config::default();
    cfg.site.physical_path = root.to_path_buf();
    Arc::new(ConnectionContext::new(Arc::new(cfg), StaticFiles::from_config).unwrap())
}

fn spawn_connection(
    stream: DuplexStream,
    ctx: Arc<ConnectionContext<StaticFiles>>,
    shutdown: &ShutdownHandle,
) -> JoinHandle<usize> {
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let mut conn = Connection::new(stream, ctx, rx);
        conn.run().await.unwrap();
        conn.requests_served()
    })
}

fn site() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("a.htm"), "A").unwrap();
    root
}

#[tokio::test]
async fn test_serves_requests_until_connection_close() {
    let root = site();
    let (shutdown, _rx) = ShutdownHandle::new();
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let task = spawn_connection(server, context(root.path()), &shutdown);

    client
        .write_all(b"GET /a.htm HTTP/1.1\r\n\r\nGET /a.htm HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    assert_eq!(task.await.unwrap(), 2);

    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    assert_eq!(text.matches("Connection: close\r\n").count(), 1);
    assert!(text.ends_with("\r\n\r\nA"));
}

#[tokio::test]
async fn test_client_close_mid_headers_gets_no_response() {
    let root = site();
    let (shutdown, _rx) = ShutdownHandle::new();
    let (mut client, server) = tokio::io::duplex(1024);
    let task = spawn_connection(server, context(root.path()), &shutdown);

    client.write_all(b"GET /a.htm HTT").await.unwrap();
    client.shutdown().await.unwrap();

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());
    assert_eq!(task.await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let root = site();
    let (shutdown, _rx) = ShutdownHandle::new();
    let (mut client, server) = tokio::io::duplex(16 * 1024);
    let task = spawn_connection(server, context(root.path()), &shutdown);

    client.write_all(b"GET / HTTP/1.1\r\nno colon here\r\n\r\n").await.unwrap();

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert_eq!(task.await.unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_idle_connection() {
    let root = site();
    let (shutdown, _rx) = ShutdownHandle::new();
    let (mut client, server) = tokio::io::duplex(1024);
    let task = spawn_connection(server, context(root.path()), &shutdown);

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.shutdown();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut out))
        .await
        .expect("connection did not close")
        .unwrap();
    assert!(out.is_empty());
    assert_eq!(task.await.unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_interrupts_stalled_request() {
    let root = site();
    let (shutdown, _rx) = ShutdownHandle::new();
    let (mut client, server) = tokio::io::duplex(1024);
    let task = spawn_connection(server, context(root.path()), &shutdown);

    // The body idle timeout is far longer than the wait below.
    client.write_all(b"GET /a.htm HTTP/1.1\r\nHost:").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.shutdown();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut out))
        .await
        .expect("stalled request held the connection open")
        .unwrap();
    assert!(out.is_empty());
    assert_eq!(task.await.unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_answers_pending_request_then_closes() {
    let root = site();
    let (shutdown, _rx) = ShutdownHandle::new();
    let (mut client, server) = tokio::io::duplex(16 * 1024);

    client.write_all(b"GET /a.htm HTTP/1.1\r\n\r\n").await.unwrap();
    shutdown.shutdown();
    let task = spawn_connection(server, context(root.path()), &shutdown);

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert_eq!(task.await.unwrap(), 1);
}
