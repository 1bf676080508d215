// ABOUTME: Integration tests for the HTTP health probe against local listeners.
// ABOUTME: Each listener answers with a canned status line, optionally after a delay.

use std::time::Duration;

use cutover::traffic::{HealthProbe, HttpProbe};
use cutover::types::Endpoint;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_millis(500);

async fn serve(status: &'static str, delay: Duration) -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let response =
                    format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    Endpoint::new("127.0.0.1", port)
}

#[tokio::test]
async fn success_status_is_healthy() {
    let endpoint = serve("200 OK", Duration::ZERO).await;
    assert!(HttpProbe::new().probe(&endpoint, "/healthz", TIMEOUT).await);

    let endpoint = serve("204 No Content", Duration::ZERO).await;
    assert!(HttpProbe::new().probe(&endpoint, "healthz", TIMEOUT).await);
}

#[tokio::test]
async fn error_status_is_unhealthy() {
    let endpoint = serve("503 Service Unavailable", Duration::ZERO).await;
    assert!(!HttpProbe::new().probe(&endpoint, "/", TIMEOUT).await);
}

#[tokio::test]
async fn slow_answer_is_unhealthy() {
    let endpoint = serve("200 OK", Duration::from_secs(5)).await;
    let started = std::time::Instant::now();
    assert!(!HttpProbe::new().probe(&endpoint, "/", TIMEOUT).await);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn refused_connection_is_unhealthy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoint = Endpoint::new("127.0.0.1", port);
    assert!(!HttpProbe::new().probe(&endpoint, "/", TIMEOUT).await);
}
