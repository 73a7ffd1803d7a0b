// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration types for `bpcollector-http`.

use std::time::Duration;

/// Configuration for an [`crate::HttpClient`] instance.
///
/// Constructed via [`crate::HttpClient::new`] or [`HttpClientBuilder::build`].
/// Retrying a failed save/publish is handled one layer up, in
/// `bpcollector-mover`'s worker loop, which retries the whole
/// save-then-publish unit rather than a single HTTP request — so this
/// client itself stays a single-shot `send`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    base_url: String,
    timeout: Duration,
    treat_http_errors_as_errors: bool,
}

impl HttpClientConfig {
    /// Create a config with the given base URL and timeout. HTTP errors are
    /// treated as errors by default.
    pub(crate) fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            base_url,
            timeout,
            treat_http_errors_as_errors: true,
        }
    }

    /// The base URL for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The default request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether HTTP 4xx/5xx responses are returned as errors.
    pub fn treat_http_errors_as_errors(&self) -> bool {
        self.treat_http_errors_as_errors
    }
}

/// Builder for [`crate::HttpClient`].
///
/// Obtain via [`crate::HttpClient::builder`].
#[derive(Debug, Default)]
pub struct HttpClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    treat_http_errors_as_errors: bool,
}

impl HttpClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            treat_http_errors_as_errors: true,
            ..Default::default()
        }
    }

    /// Set the base URL.
    pub fn base_url(mut self, url: String) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Configure whether HTTP 4xx/5xx responses are returned as errors.
    ///
    /// Default: `true`. Set to `false` to return all responses as successful,
    /// regardless of status code.
    pub fn treat_http_errors_as_errors(mut self, value: bool) -> Self {
        self.treat_http_errors_as_errors = value;
        self
    }

    /// Build the [`crate::HttpClient`].
    ///
    /// Returns [`crate::HttpClientError::InvalidConfig`] if required fields
    /// (base URL, timeout) were not set.
    pub fn build(self) -> Result<crate::HttpClient, crate::HttpClientError> {
        let base_url = self.base_url.ok_or_else(|| {
            crate::HttpClientError::InvalidConfig("base_url is required".to_owned())
        })?;
        let timeout = self.timeout.ok_or_else(|| {
            crate::HttpClientError::InvalidConfig("timeout is required".to_owned())
        })?;
        let config = HttpClientConfig {
            base_url,
            timeout,
            treat_http_errors_as_errors: self.treat_http_errors_as_errors,
        };
        crate::HttpClient::from_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_getters() {
        let config =
            HttpClientConfig::new("http://localhost:8126".to_owned(), Duration::from_secs(3));
        assert_eq!(config.base_url(), "http://localhost:8126");
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert!(config.treat_http_errors_as_errors());
    }

    #[test]
    fn builder_missing_base_url() {
        let result = HttpClientBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("base_url is required"));
    }

    #[test]
    fn builder_missing_timeout() {
        let result = HttpClientBuilder::new()
            .base_url("http://localhost".to_owned())
            .build();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("timeout is required"));
    }

    #[test]
    fn builder_success() {
        let client = HttpClientBuilder::new()
            .base_url("http://localhost:8126".to_owned())
            .timeout(Duration::from_secs(3))
            .build();
        assert!(client.is_ok());
    }

    #[test]
    fn builder_treat_http_errors_defaults_true() {
        let client = HttpClientBuilder::new()
            .base_url("http://localhost".to_owned())
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        assert!(client.config().treat_http_errors_as_errors());
    }

    #[test]
    fn builder_treat_http_errors_set_false() {
        let client = HttpClientBuilder::new()
            .base_url("http://localhost".to_owned())
            .timeout(Duration::from_secs(1))
            .treat_http_errors_as_errors(false)
            .build()
            .unwrap();
        assert!(!client.config().treat_http_errors_as_errors());
    }
}
