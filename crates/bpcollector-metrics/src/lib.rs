// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! `bpcollector-metrics` implements a dogstatsd client used by the collector
//! and the crash mover to emit operational counters and timers. Sending never
//! blocks the request path or the mover loop: a queueing UDP sink absorbs
//! bursts, and a failure to construct or reach the statsd endpoint is logged
//! and swallowed rather than propagated.

use cadence::prelude::*;
use cadence::{MetricBuilder, QueuingMetricSink, StatsdClient, UdpMetricSink};
use serde::{Deserialize, Serialize};
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::error;

// Queue with a maximum capacity of 8K elements; a collector emits far fewer
// metrics per request than a tracer does per span.
const QUEUE_SIZE: usize = 8 * 1024;

/// A single `name:value` dogstatsd tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag(String);

impl Tag {
    /// Build a tag from a key and value, joined with `:`.
    pub fn new(key: &str, value: &str) -> Self {
        Self(format!("{key}:{value}"))
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Build a [`Tag`] from a `key, value` pair.
#[macro_export]
macro_rules! tag {
    ($key:expr, $value:expr) => {
        $crate::Tag::new($key, $value)
    };
}

/// Named counters and timers emitted by the collector pipeline.
///
/// Each variant carries its own value and tag set. Construct one per event
/// and pass it to [`MetricsClient::send`] (or batch several with
/// [`MetricsClient::send_all`]).
#[derive(Debug, Serialize, Deserialize)]
pub enum Metric {
    /// A crash report accepted by the throttler, tagged with the throttle verdict.
    ReportAccepted(Vec<Tag>),
    /// A crash report rejected by the throttler, tagged with the matched rule name.
    ReportRejected(Vec<Tag>),
    /// A raw POST body failed to parse as a valid crash report.
    MalformedReport,
    /// A save to the storage backend failed after exhausting retries.
    SaveDropped,
    /// A publish to the queue backend failed after exhausting retries.
    PublishDropped,
    /// Wall-clock time spent writing a crash report's files to storage, in milliseconds.
    SaveDuration(f64),
    /// Wall-clock time spent publishing a crash id to the queue, in milliseconds.
    PublishDuration(f64),
    /// Wall-clock time from request receipt to mover completion, in milliseconds.
    CrashDuration(f64),
    /// A crash mover job was retried after a transient backend failure.
    MoverRetry,
    /// A crash mover job was abandoned after exhausting its retry budget.
    MoverAbandoned,
}

impl Metric {
    fn name(&self) -> &'static str {
        match self {
            Metric::ReportAccepted(_) => "collector.incoming_crash",
            Metric::ReportRejected(_) => "collector.throttle.rule",
            Metric::MalformedReport => "collector.malformed_report",
            Metric::SaveDropped => "collector.save.dropped",
            Metric::PublishDropped => "collector.publish.dropped",
            Metric::SaveDuration(_) => "collector.save.duration",
            Metric::PublishDuration(_) => "collector.publish.duration",
            Metric::CrashDuration(_) => "collector.crash.duration",
            Metric::MoverRetry => "mover.retry",
            Metric::MoverAbandoned => "mover.abandoned",
        }
    }
}

/// Where to reach the dogstatsd agent.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Agent host, e.g. `"127.0.0.1"` or `"localhost"`.
    pub host: String,
    /// Agent UDP port, typically `8125`.
    pub port: u16,
}

impl Endpoint {
    /// Construct an endpoint from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// A dogstatsd client that lazily connects and flushes metrics to the
/// configured endpoint.
#[derive(Debug, Default)]
pub struct MetricsClient {
    client: Mutex<Arc<Option<StatsdClient>>>,
    endpoint: Option<Endpoint>,
}

/// Build a client pointed at the given agent endpoint. Connection is deferred
/// until the first metric is sent, so this never fails even if the agent is
/// unreachable at startup.
pub fn new(endpoint: Endpoint) -> MetricsClient {
    MetricsClient {
        endpoint: Some(endpoint),
        client: Mutex::new(Arc::new(None)),
    }
}

/// Build a client with no endpoint configured. All sends are silently
/// discarded. Used when metrics are disabled.
pub fn noop() -> MetricsClient {
    MetricsClient {
        endpoint: None,
        client: Mutex::new(Arc::new(None)),
    }
}

impl MetricsClient {
    /// Send a single metric.
    pub fn send(&self, metric: Metric) {
        self.send_all(vec![metric]);
    }

    /// Send a timing metric with an explicit duration, rounding to whole
    /// milliseconds.
    pub fn send_duration(&self, metric: impl Fn(f64) -> Metric, elapsed: Duration) {
        self.send(metric(elapsed.as_secs_f64() * 1000.0));
    }

    /// Send a batch of metrics over one connection acquisition.
    pub fn send_all(&self, metrics: Vec<Metric>) {
        let client_opt = match self.get_or_init_client() {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "failed to get dogstatsd client");
                return;
            }
        };

        let Some(client) = &*client_opt else {
            return;
        };

        for metric in metrics {
            let name = metric.name();
            let result = match &metric {
                Metric::ReportAccepted(tags) => do_send(client.count_with_tags(name, 1), tags),
                Metric::ReportRejected(tags) => do_send(client.count_with_tags(name, 1), tags),
                Metric::MalformedReport
                | Metric::SaveDropped
                | Metric::PublishDropped
                | Metric::MoverRetry
                | Metric::MoverAbandoned => do_send(client.count_with_tags(name, 1), &[]),
                Metric::SaveDuration(ms) | Metric::PublishDuration(ms) | Metric::CrashDuration(ms) => {
                    do_send(
                        client.time_with_tags(name, Duration::from_secs_f64(ms.max(0.0) / 1000.0)),
                        &[],
                    )
                }
            };
            if let Err(err) = result {
                error!(error = %err, metric = name, "failed to send metric");
            }
        }
    }

    fn get_or_init_client(&self) -> anyhow::Result<Arc<Option<StatsdClient>>> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(Arc::new(None));
        };

        let mut client_guard = self
            .client
            .lock()
            .map_err(|e| anyhow::anyhow!("failed to acquire dogstatsd client lock: {e}"))?;

        if client_guard.is_some() {
            Ok(client_guard.clone())
        } else {
            let client = Arc::new(Some(create_client(endpoint)?));
            *client_guard = client.clone();
            Ok(client)
        }
    }
}

fn do_send<'m, 't, T>(mut builder: MetricBuilder<'m, '_, T>, tags: &'t [Tag]) -> anyhow::Result<()>
where
    T: cadence::Metric + From<String>,
    't: 'm,
{
    for tag in tags {
        builder = builder.with_tag_value(tag.as_ref());
    }
    builder.try_send()?;
    Ok(())
}

fn create_client(endpoint: &Endpoint) -> anyhow::Result<StatsdClient> {
    let server_address = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("invalid address: {}:{}", endpoint.host, endpoint.port))?;

    let socket = if server_address.is_ipv4() {
        UdpSocket::bind("0.0.0.0:0")?
    } else {
        UdpSocket::bind("[::]:0")?
    };
    socket.set_nonblocking(true)?;

    let sink = QueuingMetricSink::with_capacity(
        UdpMetricSink::from((endpoint.host.as_str(), endpoint.port), socket)?,
        QUEUE_SIZE,
    );

    Ok(StatsdClient::from_sink("bpcollector", sink))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_send_emits_datagrams() {
        let socket = net::UdpSocket::bind("127.0.0.1:0").expect("failed to bind host socket");
        let _ = socket.set_read_timeout(Some(Duration::from_millis(500)));
        let addr = socket.local_addr().unwrap();

        let client = new(Endpoint::new(addr.ip().to_string(), addr.port()));
        client.send_all(vec![
            Metric::ReportAccepted(vec![tag!("verdict", "accept")]),
            Metric::SaveDropped,
            Metric::SaveDuration(12.5),
        ]);

        fn read(socket: &net::UdpSocket) -> String {
            let mut buf = [0; 256];
            let n = socket.recv(&mut buf).expect("no data");
            String::from_utf8_lossy(&buf[..n]).to_string()
        }

        assert_eq!(
            "bpcollector.collector.incoming_crash:1|c|#verdict:accept",
            read(&socket)
        );
        assert_eq!("bpcollector.collector.save.dropped:1|c", read(&socket));
        assert_eq!("bpcollector.collector.save.duration:12|ms", read(&socket));
    }

    #[test]
    fn noop_client_never_connects() {
        let client = noop();
        client.send(Metric::SaveDropped);
        assert!(client.client.lock().unwrap().is_none());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_create_client_invalid_host() {
        let res = create_client(&Endpoint::new("", 0));
        assert!(res.is_err());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_thread_safety() {
        let socket = net::UdpSocket::bind("127.0.0.1:0").expect("failed to bind host socket");
        let _ = socket.set_read_timeout(Some(Duration::from_millis(500)));
        let addr = socket.local_addr().unwrap();
        let client = Arc::new(new(Endpoint::new(addr.ip().to_string(), addr.port())));

        {
            let guard = client.client.lock().expect("failed to obtain lock");
            assert!(guard.is_none());
        }

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move {
                    client.send(Metric::ReportAccepted(vec![tag!("verdict", "accept")]));
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let guard = client.client.lock().expect("failed to obtain lock");
        assert!(guard.is_some());
    }
}
