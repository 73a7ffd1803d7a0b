// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error type shared by every backend this client talks to: object stores
//! and message queues over plain REST.

use thiserror::Error;

/// Errors `HttpClient::send` can return.
///
/// `bpcollector-storage` and `bpcollector-publish` classify these into
/// transient (worth a mover retry) or permanent (not) in their own
/// `StorageError`/`PublishError` types — see the `map_http_error` helper in
/// each crate.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The TCP/socket connection to the backend could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The request exceeded the client's configured timeout.
    #[error("request timed out")]
    TimedOut,

    /// The backend returned an HTTP error status code.
    ///
    /// Only raised when `treat_http_errors_as_errors` is `true` (the
    /// default). `body` is the response body, lossy-decoded as UTF-8.
    #[error("request failed with status {status}: {body}")]
    RequestFailed {
        /// The HTTP status code (e.g. 404, 503).
        status: u16,
        /// The response body, lossy-decoded as UTF-8.
        body: String,
    },

    /// The client was built with a missing or invalid setting (e.g. no
    /// base URL). Never returned once a client is successfully constructed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An I/O error occurred while sending the request or reading the
    /// response body.
    #[error("I/O error: {0}")]
    IoError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failed_display() {
        let err = HttpClientError::ConnectionFailed("refused".to_owned());
        assert_eq!(err.to_string(), "connection failed: refused");
    }

    #[test]
    fn timed_out_display() {
        let err = HttpClientError::TimedOut;
        assert_eq!(err.to_string(), "request timed out");
    }

    #[test]
    fn request_failed_display() {
        let err = HttpClientError::RequestFailed {
            status: 503,
            body: "service unavailable".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "request failed with status 503: service unavailable"
        );
    }

    #[test]
    fn invalid_config_display() {
        let err = HttpClientError::InvalidConfig("missing url".to_owned());
        assert_eq!(err.to_string(), "invalid configuration: missing url");
    }

    #[test]
    fn io_error_display() {
        let err = HttpClientError::IoError("broken pipe".to_owned());
        assert_eq!(err.to_string(), "I/O error: broken pipe");
    }
}
