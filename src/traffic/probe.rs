// ABOUTME: Health probe collaborator: (endpoint, path, timeout) -> healthy.
// ABOUTME: HttpProbe issues a plain HTTP/1.1 GET and accepts any 2xx answer.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;

use super::error::ProbeError;
use crate::types::Endpoint;

/// Probes one endpoint. Implementations must answer within `timeout`;
/// callers treat anything slower as a failure regardless.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint, path: &str, timeout: Duration) -> bool;
}

/// HTTP health probe over a fresh TCP connection per check.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe;

impl HttpProbe {
    pub fn new() -> Self {
        Self
    }

    async fn get_status(&self, endpoint: &Endpoint, path: &str) -> Result<StatusCode, ProbeError> {
        let stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("probe connection closed with error: {}", e);
            }
        });

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        let req = hyper::Request::builder()
            .method(hyper::Method::GET)
            .uri(path)
            .header(hyper::header::HOST, endpoint.authority())
            .header(hyper::header::USER_AGENT, "cutover-health-check")
            .header(hyper::header::CONNECTION, "close")
            .body(Empty::<Bytes>::new())?;

        let resp = sender.send_request(req).await?;
        let status = resp.status();
        // Drain so the connection shuts down cleanly.
        let _ = resp.into_body().collect().await;
        Ok(status)
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, endpoint: &Endpoint, path: &str, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.get_status(endpoint, path)).await {
            Ok(Ok(status)) => {
                if !status.is_success() {
                    tracing::debug!(%endpoint, %status, "health probe returned non-2xx");
                }
                status.is_success()
            }
            Ok(Err(e)) => {
                tracing::debug!(%endpoint, "health probe failed: {}", e);
                false
            }
            Err(_elapsed) => {
                tracing::debug!(%endpoint, ?timeout, "health probe timed out");
                false
            }
        }
    }
}
