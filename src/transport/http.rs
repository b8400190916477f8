//! Request-per-message delivery over HTTP.
//!
//! Each wire message is one `POST /control` with a JSON body. Only a 200
//! response counts as an acknowledgement. `connect` is a `GET /health`
//! liveness check, since HTTP has no long-lived connection to establish.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::{FrameSink, TransportKind};
use crate::constants::{CONTROL_PATH, DEFAULT_REQUEST_TIMEOUT, HEALTH_CHECK_TIMEOUT, HEALTH_PATH};
use crate::error::TransportError;

/// Result of a `/health` check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// `status` field of the response body, when present.
    pub status: Option<String>,
    /// Round-trip time of the check.
    pub latency: Duration,
}

impl HealthReport {
    /// Whether the receiver described itself as healthy.
    ///
    /// A 200 without a recognisable body still counts.
    pub fn is_healthy(&self) -> bool {
        self.status
            .as_deref()
            .is_none_or(|s| matches!(s, "healthy" | "ok"))
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: Option<String>,
}

/// HTTP sink backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    control_url: Url,
    health_url: Url,
}

impl HttpSink {
    /// Sink for `server_url` with the default request timeout.
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        Self::with_timeout(server_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Sink for `server_url` whose requests give up after `timeout`.
    pub fn with_timeout(server_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base = parse_base_url(server_url)?;
        let join = |path: &str| {
            base.join(path.trim_start_matches('/'))
                .map_err(|e| TransportError::InvalidAddress(format!("{server_url}: {e}")))
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ConnectFailed(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            control_url: join(CONTROL_PATH)?,
            health_url: join(HEALTH_PATH)?,
            client,
        })
    }

    /// Endpoint receiving wire messages.
    pub fn control_url(&self) -> &Url {
        &self.control_url
    }

    /// Call `GET /health`.
    ///
    /// Any status other than 200 is reported as `ConnectFailed`.
    pub async fn health(&self) -> Result<HealthReport, TransportError> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.health_url.clone())
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransportError::ConnectFailed(format!(
                "health check returned {}",
                status.as_u16()
            )));
        }
        let body = response.json::<HealthBody>().await.ok();
        Ok(HealthReport {
            status: body.and_then(|b| b.status),
            latency: started.elapsed(),
        })
    }
}

/// Parse and normalise a receiver base URL (trailing slash so joins keep
/// any path prefix).
fn parse_base_url(server_url: &str) -> Result<Url, TransportError> {
    let trimmed = server_url.trim();
    let mut url = Url::parse(trimmed)
        .map_err(|e| TransportError::InvalidAddress(format!("{trimmed}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
        return Err(TransportError::InvalidAddress(trimmed.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::InvalidAddress(e.to_string())
    } else {
        TransportError::ConnectFailed(e.to_string())
    }
}

#[async_trait]
impl FrameSink for HttpSink {
    async fn connect(&self) -> Result<(), TransportError> {
        let report = self.health().await?;
        if !report.is_healthy() {
            log::warn!(
                "Receiver reports status {:?}; streaming anyway",
                report.status
            );
        }
        log::info!(
            "Receiver at {} is up ({} ms)",
            self.control_url,
            report.latency.as_millis()
        );
        Ok(())
    }

    async fn send(&self, payload: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.control_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match response.status() {
            StatusCode::OK => Ok(()),
            other => Err(TransportError::SendFailed(Some(other.as_u16()))),
        }
    }

    async fn disconnect(&self) {}

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }
}
