// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP request type for `bpcollector-http`.

use std::time::Duration;

/// HTTP methods used by the storage and publish adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// HEAD
    Head,
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,

    /// Absolute URL string (e.g. `"https://bucket.s3.amazonaws.com/v1/abc123"`).
    pub url: String,

    /// Request headers as a list of (name, value) pairs.
    ///
    /// Vec preserves insertion order and allows duplicate header names,
    /// both of which are valid in HTTP.
    pub headers: Vec<(String, String)>,

    /// Request body bytes. Empty for requests with no body.
    pub body: bytes::Bytes,

    /// Per-request timeout. Overrides the client-level timeout if set.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a new request with the given method and URL, no headers, no body,
    /// and no per-request timeout override.
    pub fn new(method: HttpMethod, url: String) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: bytes::Bytes::new(),
            timeout: None,
        }
    }
}
