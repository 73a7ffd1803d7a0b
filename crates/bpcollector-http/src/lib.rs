// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! `bpcollector-http` is a small async HTTP client shared by the storage and
//! publish adapters to talk to an object store or message queue's plain
//! REST API. It offers a single-shot `send()` over a concrete `HttpClient`
//! struct backed by `reqwest`. Retrying a failed call is the caller's job:
//! `bpcollector-mover` retries the whole save-then-publish unit, not a
//! single request, so this crate does not layer its own retry loop on top.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), bpcollector_http::HttpClientError> {
//! use bpcollector_http::{HttpClient, HttpMethod, HttpRequest};
//! use std::time::Duration;
//!
//! let client = HttpClient::new("http://localhost:8080".to_string(), Duration::from_secs(5))?;
//! let request = HttpRequest::new(HttpMethod::Get, "http://localhost:8080/ping".to_string());
//! let response = client.send(request).await?;
//! println!("Status: {}", response.status_code);
//! # Ok(())
//! # }
//! ```

pub mod config;

mod backend;
mod client;
mod error;
mod request;
mod response;

pub use client::HttpClient;
pub use config::{HttpClientBuilder, HttpClientConfig};
pub use error::HttpClientError;
pub use request::{HttpMethod, HttpRequest};
pub use response::HttpResponse;
