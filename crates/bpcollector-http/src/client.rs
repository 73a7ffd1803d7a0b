// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The public `HttpClient` struct.

use crate::backend::ReqwestBackend;
use crate::config::{HttpClientBuilder, HttpClientConfig};
use crate::{HttpClientError, HttpRequest, HttpResponse};
use std::time::Duration;

/// A high-level async HTTP client.
///
/// Constructed once and reused across many [`HttpClient::send`] calls. Holds
/// a connection pool internally.
#[derive(Debug)]
pub struct HttpClient {
    backend: ReqwestBackend,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Construct a client for the given base URL and default timeout.
    ///
    /// This is the simple constructor for the common case. Use
    /// [`HttpClient::builder`] for advanced configuration.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, HttpClientError> {
        Self::from_config(HttpClientConfig::new(base_url, timeout))
    }

    /// Returns a builder for constructing an `HttpClient` with advanced options.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub(crate) fn from_config(config: HttpClientConfig) -> Result<Self, HttpClientError> {
        let backend = ReqwestBackend::new(config.timeout())?;
        Ok(Self { backend, config })
    }

    /// The client's configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Send an HTTP request and return the response.
    ///
    /// This client makes a single attempt per call. `bpcollector-mover`
    /// retries the whole save-then-publish unit around calls like this one,
    /// so retrying individual requests here would only duplicate that loop.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        self.backend.send(request, &self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_client() {
        let client = HttpClient::new("http://localhost:8126".to_owned(), Duration::from_secs(3));
        assert!(client.is_ok());
        let client = client.unwrap();
        assert_eq!(client.config().base_url(), "http://localhost:8126");
        assert_eq!(client.config().timeout(), Duration::from_secs(3));
    }

    #[test]
    fn builder_creates_client() {
        let client = HttpClient::builder()
            .base_url("http://localhost:8126".to_owned())
            .timeout(Duration::from_secs(5))
            .build();
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn send_returns_error_when_no_server() {
        let client =
            HttpClient::new("http://localhost".to_owned(), Duration::from_secs(1)).unwrap();
        let req = crate::HttpRequest::new(
            crate::request::HttpMethod::Get,
            "http://localhost/ping".to_owned(),
        );
        let result = client.send(req).await;
        assert!(result.is_err());
    }
}
