// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The response half of a `send()` call.

/// A response received from an object store or message queue backend.
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code (e.g. 200, 404, 503).
    pub status_code: u16,

    /// Response headers as a list of (name, value) pairs.
    pub headers: Vec<(String, String)>,

    /// Response body bytes.
    pub body: bytes::Bytes,
}

impl HttpResponse {
    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        let response = HttpResponse {
            status_code: 204,
            headers: Vec::new(),
            body: bytes::Bytes::new(),
        };
        assert!(response.is_success());
    }

    #[test]
    fn error_status_is_not_success() {
        let response = HttpResponse {
            status_code: 503,
            headers: Vec::new(),
            body: bytes::Bytes::new(),
        };
        assert!(!response.is_success());
    }
}
