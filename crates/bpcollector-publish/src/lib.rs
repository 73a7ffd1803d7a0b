// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Publish adapters announce an accepted crash's id to a downstream queue or
//! topic so a separate processing fleet can pick it up. The message body is
//! always the bare 36-character id, ASCII, with no envelope.

use async_trait::async_trait;
use bpcollector_http::{HttpClient, HttpMethod, HttpRequest};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors a publish adapter can return from `publish` or `verify`.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A retryable failure: timeouts, connection resets, HTTP 5xx, deadline exceeded.
    #[error("transient publish error: {0}")]
    Transient(String),
    /// A non-retryable failure: bad credentials, malformed request.
    #[error("permanent publish error: {0}")]
    Permanent(String),
}

impl PublishError {
    /// Whether the crash-mover should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }
}

/// Which publish backend `CRASHMOVER_CRASHPUBLISH_CLASS` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishClass {
    /// SQS-style queue, single-message send.
    Sqs,
    /// Pub/Sub-style topic, single-message publish.
    PubSub,
    /// Discards publishes; used by the verifier's dry run and by tests.
    Noop,
}

impl FromStr for PublishClass {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqs" | "SQSCrashPublish" => Ok(PublishClass::Sqs),
            "pubsub" | "PubSubCrashPublish" => Ok(PublishClass::PubSub),
            "noop" | "NoOpCrashPublish" => Ok(PublishClass::Noop),
            other => Err(PublishError::Permanent(format!(
                "unknown publish class '{other}'"
            ))),
        }
    }
}

/// The capability every publish backend exposes to the crash-mover and the
/// startup verifier.
#[async_trait]
pub trait Publish: Send + Sync {
    /// Announce `id` to the downstream queue or topic. Must complete within
    /// the adapter's configured deadline or be counted as `Transient`.
    async fn publish(&self, id: &str) -> Result<(), PublishError>;

    /// Exercise publish capability without requiring a consumer. Called once
    /// at startup by the verifier.
    async fn verify(&self) -> Result<(), PublishError>;
}

fn map_http_error(err: bpcollector_http::HttpClientError) -> PublishError {
    match &err {
        bpcollector_http::HttpClientError::TimedOut
        | bpcollector_http::HttpClientError::ConnectionFailed(_)
        | bpcollector_http::HttpClientError::IoError(_) => PublishError::Transient(err.to_string()),
        bpcollector_http::HttpClientError::RequestFailed { status, .. } if *status >= 500 => {
            PublishError::Transient(err.to_string())
        }
        _ => PublishError::Permanent(err.to_string()),
    }
}

async fn send_message(client: &HttpClient, endpoint_url: &str, body: String, timeout: Duration) -> Result<(), PublishError> {
    let mut request = HttpRequest::new(HttpMethod::Post, endpoint_url.to_owned());
    request.body = body.into_bytes().into();
    request.timeout = Some(timeout);

    match tokio::time::timeout(timeout, client.send(request)).await {
        Ok(Ok(response)) if response.status_code < 400 => Ok(()),
        Ok(Ok(response)) => Err(PublishError::Permanent(format!(
            "unexpected status {}",
            response.status_code
        ))),
        Ok(Err(e)) => Err(map_http_error(e)),
        Err(_) => Err(PublishError::Transient("publish deadline exceeded".to_owned())),
    }
}

/// Publish backend over an SQS-style single-message-send HTTP endpoint.
pub struct SqsPublish {
    client: HttpClient,
    queue_url: String,
    timeout: Duration,
}

impl SqsPublish {
    /// Build an adapter that POSTs messages to `queue_url`.
    pub fn new(queue_url: String, timeout: Duration) -> Result<Self, PublishError> {
        let client = HttpClient::builder()
            .base_url(queue_url.clone())
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Permanent(e.to_string()))?;
        Ok(Self {
            client,
            queue_url,
            timeout,
        })
    }
}

#[async_trait]
impl Publish for SqsPublish {
    async fn publish(&self, id: &str) -> Result<(), PublishError> {
        send_message(&self.client, &self.queue_url, id.to_owned(), self.timeout).await
    }

    async fn verify(&self) -> Result<(), PublishError> {
        send_message(&self.client, &self.queue_url, "__verify__".to_owned(), self.timeout).await
    }
}

/// Publish backend over a Pub/Sub-style single-message-publish HTTP endpoint.
///
/// A short-lived ordering key is not required for this workload, so the
/// request shape matches [`SqsPublish`] exactly.
pub struct PubSubPublish {
    client: HttpClient,
    topic_url: String,
    timeout: Duration,
}

impl PubSubPublish {
    /// Build an adapter that POSTs messages to `topic_url`.
    pub fn new(topic_url: String, timeout: Duration) -> Result<Self, PublishError> {
        let client = HttpClient::builder()
            .base_url(topic_url.clone())
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Permanent(e.to_string()))?;
        Ok(Self {
            client,
            topic_url,
            timeout,
        })
    }
}

#[async_trait]
impl Publish for PubSubPublish {
    async fn publish(&self, id: &str) -> Result<(), PublishError> {
        send_message(&self.client, &self.topic_url, id.to_owned(), self.timeout).await
    }

    async fn verify(&self) -> Result<(), PublishError> {
        send_message(&self.client, &self.topic_url, "__verify__".to_owned(), self.timeout).await
    }
}

/// Publish backend that discards every message. Used by the verifier's dry
/// run and by tests.
#[derive(Debug, Default)]
pub struct NoopPublish;

#[async_trait]
impl Publish for NoopPublish {
    async fn publish(&self, _id: &str) -> Result<(), PublishError> {
        Ok(())
    }

    async fn verify(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Build a shared, dyn publish backend from its class and endpoint.
pub fn build(class: PublishClass, endpoint_url: Option<String>, timeout: Duration) -> Result<Arc<dyn Publish>, PublishError> {
    match class {
        PublishClass::Sqs => {
            let url = endpoint_url.ok_or_else(|| {
                PublishError::Permanent("sqs publish requires a queue url".to_owned())
            })?;
            Ok(Arc::new(SqsPublish::new(url, timeout)?))
        }
        PublishClass::PubSub => {
            let url = endpoint_url.ok_or_else(|| {
                PublishError::Permanent("pubsub publish requires a topic url".to_owned())
            })?;
            Ok(Arc::new(PubSubPublish::new(url, timeout)?))
        }
        PublishClass::Noop => Ok(Arc::new(NoopPublish)),
    }
}
