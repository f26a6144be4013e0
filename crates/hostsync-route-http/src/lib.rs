// # HTTP Route Source
//
// This crate provides the route source used by the daemon: it asks the
// DevProxy API for its route table.
//
// ## Protocol
//
// `GET <api_url>/api/routes` answers `200 OK` with a JSON array of route
// objects (`id`, `name`, `domain`, `target`, `enabled`, plus fields this
// crate ignores). Any other status, a transport failure or an undecodable
// body is a fetch failure; the engine then leaves the hosts file alone.
//
// ## Architecture
//
// One request per reconciliation cycle. No caching and no retries here:
// the engine's next tick is the retry.

use hostsync_core::config::AgentConfig;
use hostsync_core::{Error, Result, Route, RouteSource};

use std::time::Duration;

/// Route source backed by the DevProxy HTTP API
pub struct HttpRouteSource {
    /// Full URL of the routes endpoint
    url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpRouteSource {
    /// Create a new HTTP route source
    ///
    /// # Parameters
    ///
    /// - `url`: Full endpoint URL (e.g., "http://localhost:8090/api/routes")
    /// - `timeout`: Per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create a source for the endpoint and timeout in `config`
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.routes_url(), config.fetch_timeout())
    }

    /// Endpoint this source queries
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl RouteSource for HttpRouteSource {
    async fn fetch(&self) -> Result<Vec<Route>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("connect to DevProxy: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!(
                "DevProxy returned status {}",
                status.as_u16()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(format!("read response: {}", e)))?;

        let routes: Vec<Route> = serde_json::from_slice(&body)
            .map_err(|e| Error::fetch(format!("decode response: {}", e)))?;

        tracing::debug!("Fetched {} routes from {}", routes.len(), self.url);
        Ok(routes)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::assert_err;

    /// Serve exactly one request with a canned response and return the URL
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            assert!(request.starts_with(b"GET /api/routes "));

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn source_for(base: &str) -> HttpRouteSource {
        let config = AgentConfig {
            api_url: base.to_string(),
            fetch_timeout_secs: 2,
            ..AgentConfig::default()
        };
        HttpRouteSource::from_config(&config)
    }

    #[tokio::test]
    async fn test_fetch_decodes_routes() {
        let base = serve_once(
            "200 OK",
            r#"[
                {"id": 1, "name": "app", "domain": "app.test", "target": "http://app:3000", "enabled": true,
                 "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"},
                {"id": 2, "name": "old", "domain": "old.test", "target": "http://old:80", "enabled": false}
            ]"#,
        )
        .await;

        let routes = source_for(&base).fetch().await.unwrap();

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].id, 1);
        assert_eq!(routes[0].domain, "app.test");
        assert!(routes[0].enabled);
        assert_eq!(routes[1].name, "old");
        assert!(!routes[1].enabled);
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_failure() {
        let base = serve_once("503 Service Unavailable", "").await;

        let err = source_for(&base).fetch().await.unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
        assert!(err.to_string().contains("status 503"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_fetch_failure() {
        let base = serve_once("200 OK", r#"{"routes": "nope"}"#).await;

        let err = source_for(&base).fetch().await.unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
        assert!(err.to_string().contains("decode response"));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_fetch_failure() {
        // Bind and drop to get a port with nothing listening on it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = source_for(&format!("http://{}", addr)).fetch().await;

        assert_err!(&result);
        assert!(matches!(result, Err(Error::Fetch(_))));
    }

    #[test]
    fn test_from_config_targets_routes_endpoint() {
        let source = source_for("http://localhost:8090/");
        assert_eq!(source.url(), "http://localhost:8090/api/routes");
        assert_eq!(source.source_name(), "http");
    }
}
