//! Receiver liveness check.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::transport::{HealthReport, HttpSink, TransportKind};

/// HTTP base URL for the configured receiver.
///
/// A WebSocket receiver serves `/health` on the same host over HTTP.
fn health_base(config: &Config) -> String {
    let url = config.server_url.as_str();
    if config.transport != TransportKind::WebSocket {
        return url.to_string();
    }
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

/// Check `/health` and print the result.
pub async fn run(config: &Config) -> Result<HealthReport> {
    let base = health_base(config);
    let sink = HttpSink::with_timeout(&base, config.request_timeout())
        .with_context(|| format!("Invalid server URL {}", base))?;
    let report = sink
        .health()
        .await
        .with_context(|| format!("Health check against {} failed", base))?;

    println!(
        "{}: {} ({} ms)",
        base,
        report.status.as_deref().unwrap_or("reachable"),
        report.latency.as_millis()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_health_base_maps_ws_scheme() {
        let mut config = Config {
            server_url: "wss://robot.local/stream".to_string(),
            transport: TransportKind::WebSocket,
            ..Config::default()
        };
        assert_eq!(health_base(&config), "https://robot.local/stream");
        config.server_url = "ws://10.0.0.2:5000".to_string();
        assert_eq!(health_base(&config), "http://10.0.0.2:5000");
        config.transport = TransportKind::Http;
        assert_eq!(health_base(&config), "ws://10.0.0.2:5000");
    }

    #[tokio::test]
    async fn test_health_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})),
            )
            .mount(&server)
            .await;

        let config = Config {
            server_url: server.uri(),
            ..Config::default()
        };
        let report = run(&config).await.unwrap();
        assert!(report.is_healthy());
        assert_eq!(report.status.as_deref(), Some("healthy"));
    }

    #[tokio::test]
    async fn test_health_error_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = Config {
            server_url: server.uri(),
            ..Config::default()
        };
        assert!(run(&config).await.is_err());
    }
}
