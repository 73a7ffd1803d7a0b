// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! The crash-mover owns the bounded hand-off queue between the submit
//! handler and the object-store/queue adapters. A fixed pool of concurrent
//! tasks, capped by a [`tokio::sync::Semaphore`], drains the queue; each
//! task drives storage then (if accepted) publish with bounded exponential
//! backoff, and a panic while handling one crash is isolated by
//! `tokio::spawn`'s own unwind boundary — a `JoinHandle` that reports
//! `JoinError::is_panic()` is treated exactly like a dropped crash, and the
//! pool keeps running.

use bpcollector_metrics::{Metric, MetricsClient};
use bpcollector_publish::Publish;
use bpcollector_storage::Storage;
use bpcollector_types::{CrashReport, MoverOutcome, ThrottleVerdict};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Bounded-retry and pool-sizing knobs, sourced from `CRASHMOVER_*` config.
#[derive(Debug, Clone)]
pub struct MoverConfig {
    /// Number of crashes processed concurrently.
    pub workers: usize,
    /// Hand-off queue capacity.
    pub queue_capacity: usize,
    /// How long `enqueue` blocks before giving up. `None` waits forever.
    pub enqueue_timeout: Option<Duration>,
    /// Maximum storage retry attempts after the first try.
    pub save_retries: u32,
    /// Maximum publish retry attempts after the first try.
    pub publish_retries: u32,
    /// How long graceful shutdown waits for the queue to drain.
    pub shutdown_drain: Duration,
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 32,
            enqueue_timeout: None,
            save_retries: 5,
            publish_retries: 5,
            shutdown_drain: Duration::from_secs(30),
        }
    }
}

/// Error returned when a crash cannot be handed off to the mover.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The queue stayed full for the configured enqueue deadline.
    #[error("hand-off queue saturated")]
    QueueSaturated,
    /// The mover has shut down and is no longer accepting work.
    #[error("crash mover is shutting down")]
    Closed,
}

/// A handle the submit handler uses to hand off accepted crashes. Cheap to
/// clone; every request task gets its own clone of the underlying sender.
#[derive(Clone)]
pub struct MoverHandle {
    sender: mpsc::Sender<CrashReport>,
    enqueue_timeout: Option<Duration>,
}

impl MoverHandle {
    /// Hand off a crash report. Blocks (bounded by `enqueue_timeout`) while
    /// the queue is full — this is the pipeline's sole backpressure channel.
    pub async fn enqueue(&self, report: CrashReport) -> Result<(), EnqueueError> {
        match self.enqueue_timeout {
            None => self
                .sender
                .send(report)
                .await
                .map_err(|_| EnqueueError::Closed),
            Some(timeout) => match tokio::time::timeout(timeout, self.sender.send(report)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(EnqueueError::Closed),
                Err(_) => Err(EnqueueError::QueueSaturated),
            },
        }
    }
}

/// Aggregate counts after a graceful-shutdown drain attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainReport {
    /// Crashes that reached a terminal state before the deadline.
    pub completed: u64,
    /// Crashes still queued or in flight when the deadline expired.
    pub abandoned: u64,
}

/// Owns the running worker pool. `shutdown` signals workers to stop pulling
/// new work and `join` awaits the drain.
pub struct CrashMover {
    shutdown_tx: watch::Sender<bool>,
    join_handle: tokio::task::JoinHandle<DrainReport>,
}

impl CrashMover {
    /// Start the hand-off queue and worker pool. Returns the mover (used to
    /// trigger and await shutdown) and the handle request tasks enqueue onto.
    pub fn start(
        config: MoverConfig,
        storage: Arc<dyn Storage>,
        publish: Arc<dyn Publish>,
        metrics: Arc<MetricsClient>,
    ) -> (Self, MoverHandle) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = MoverHandle {
            sender,
            enqueue_timeout: config.enqueue_timeout,
        };

        let join_handle = tokio::spawn(run_pool(
            receiver,
            storage,
            publish,
            metrics,
            config,
            shutdown_rx,
        ));

        (
            Self {
                shutdown_tx,
                join_handle,
            },
            handle,
        )
    }

    /// Signal the pool to stop accepting new items and wait for in-flight
    /// and already-queued work to drain, bounded by `shutdown_drain`.
    pub async fn shutdown(self) -> DrainReport {
        let _ = self.shutdown_tx.send(true);
        match self.join_handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "crash mover pool task panicked during shutdown");
                DrainReport::default()
            }
        }
    }
}

async fn run_pool(
    mut receiver: mpsc::Receiver<CrashReport>,
    storage: Arc<dyn Storage>,
    publish: Arc<dyn Publish>,
    metrics: Arc<MetricsClient>,
    config: MoverConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DrainReport {
    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut tasks: JoinSet<MoverOutcome> = JoinSet::new();
    let completed = Arc::new(AtomicU64::new(0));
    let abandoned = Arc::new(AtomicU64::new(0));

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    break;
                }
            }
            maybe_report = receiver.recv() => {
                match maybe_report {
                    Some(report) => spawn_one(report, &semaphore, &storage, &publish, &metrics, &config, &mut tasks).await,
                    None => break,
                }
            }
            Some(result) = tasks.join_next() => {
                record_outcome(result, &completed);
            }
        }
    }

    // Drain: keep pulling from the now-closed-to-new-senders queue and
    // awaiting in-flight tasks until the deadline expires.
    let deadline = Instant::now() + config.shutdown_drain;
    receiver.close();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::select! {
            maybe_report = receiver.recv() => {
                match maybe_report {
                    Some(report) => spawn_one(report, &semaphore, &storage, &publish, &metrics, &config, &mut tasks).await,
                    None => {
                        if tasks.is_empty() {
                            break;
                        }
                    }
                }
            }
            Some(result) = tasks.join_next() => {
                record_outcome(result, &completed);
            }
            _ = tokio::time::sleep(remaining) => break,
        }
    }

    let leftover = tasks.len() as u64;
    if leftover > 0 {
        warn!(leftover, "shutdown drain deadline expired with crashes still in flight");
        abandoned.fetch_add(leftover, Ordering::Relaxed);
        tasks.abort_all();
    }

    DrainReport {
        completed: completed.load(Ordering::Relaxed),
        abandoned: abandoned.load(Ordering::Relaxed),
    }
}

async fn spawn_one(
    report: CrashReport,
    semaphore: &Arc<Semaphore>,
    storage: &Arc<dyn Storage>,
    publish: &Arc<dyn Publish>,
    metrics: &Arc<MetricsClient>,
    config: &MoverConfig,
    tasks: &mut JoinSet<MoverOutcome>,
) {
    #[allow(clippy::unwrap_used)]
    let permit = semaphore.clone().acquire_owned().await.unwrap();
    let storage = storage.clone();
    let publish = publish.clone();
    let metrics = metrics.clone();
    let config = config.clone();
    tasks.spawn(async move {
        let _permit = permit;
        process(report, storage, publish, metrics, config).await
    });
}

fn record_outcome(result: Result<MoverOutcome, tokio::task::JoinError>, completed: &Arc<AtomicU64>) {
    match result {
        Ok(_) => {
            completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) if e.is_panic() => {
            error!("crash mover worker panicked while handling a crash; crash dropped");
        }
        Err(e) => {
            warn!(error = %e, "crash mover worker task was cancelled");
        }
    }
}

async fn process(
    mut report: CrashReport,
    storage: Arc<dyn Storage>,
    publish: Arc<dyn Publish>,
    metrics: Arc<MetricsClient>,
    config: MoverConfig,
) -> MoverOutcome {
    let start = Instant::now();

    if matches!(report.throttle.verdict, ThrottleVerdict::FakeAccept) {
        info!(id = %report.id, "fake-accepted crash discarded before mover work");
        return MoverOutcome::Done;
    }

    let save_start = Instant::now();
    let saved = retry(config.save_retries, || {
        let storage = storage.clone();
        let report = &report;
        async move { storage.save(&report.id, &report.annotations, &report.dumps).await }
    })
    .await;
    metrics.send_duration(Metric::SaveDuration, save_start.elapsed());

    if let Err(err) = saved {
        error!(id = %report.id, error = %err, "dropping crash after storage retries exhausted");
        metrics.send(Metric::SaveDropped);
        return MoverOutcome::DroppedSave;
    }

    if !report.should_publish() {
        metrics.send_duration(Metric::CrashDuration, start.elapsed());
        return MoverOutcome::Done;
    }

    let publish_start = Instant::now();
    let published = retry(config.publish_retries, || {
        let publish = publish.clone();
        let id = report.id.clone();
        async move { publish.publish(&id).await }
    })
    .await;
    metrics.send_duration(Metric::PublishDuration, publish_start.elapsed());

    if let Err(err) = published {
        error!(id = %report.id, error = %err, "crash saved but publish retries exhausted");
        metrics.send(Metric::PublishDropped);
        report.note("publish_dropped");
        metrics.send_duration(Metric::CrashDuration, start.elapsed());
        return MoverOutcome::DroppedPublish;
    }

    metrics.send_duration(Metric::CrashDuration, start.elapsed());
    MoverOutcome::Done
}

/// Retry an async operation up to `max_retries` additional times with
/// exponential backoff (100ms, 200ms, 400ms, ...), jittered by ±10%, only
/// while the error reports itself as transient via `is_transient`.
async fn retry<F, Fut, T, E>(max_retries: u32, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: IsTransient,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries && err.is_transient() => {
                let backoff = backoff_for_attempt(attempt);
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let base_ms = 100u64.saturating_mul(1u64 << attempt.min(10));
    let jitter_range = base_ms / 10;
    let jitter = if jitter_range == 0 {
        0
    } else {
        fastrand::u64(0..=jitter_range)
    };
    Duration::from_millis(base_ms - jitter_range / 2 + jitter)
}

/// Shared contract the retry loop needs from adapter errors.
pub trait IsTransient {
    /// Whether this error should be retried.
    fn is_transient(&self) -> bool;
}

impl IsTransient for bpcollector_storage::StorageError {
    fn is_transient(&self) -> bool {
        bpcollector_storage::StorageError::is_transient(self)
    }
}

impl IsTransient for bpcollector_publish::PublishError {
    fn is_transient(&self) -> bool {
        bpcollector_publish::PublishError::is_transient(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bpcollector_types::{CrashAnnotations, DumpSet, PayloadKind, ThrottleDecision};
    use std::sync::atomic::AtomicUsize;

    struct FlakyStorage {
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn save(
            &self,
            _id: &str,
            _annotations: &CrashAnnotations,
            _dumps: &DumpSet,
        ) -> Result<(), bpcollector_storage::StorageError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(bpcollector_storage::StorageError::Transient("flaky".into()))
            } else {
                Ok(())
            }
        }

        async fn verify(&self) -> Result<(), bpcollector_storage::StorageError> {
            Ok(())
        }
    }

    fn sample_report(verdict: ThrottleVerdict) -> CrashReport {
        CrashReport {
            id: "0".repeat(37),
            annotations: CrashAnnotations::new(),
            dumps: DumpSet::new(),
            received_at: chrono::Utc::now(),
            payload_kind: PayloadKind::Multipart,
            payload_compressed: false,
            notes: Vec::new(),
            throttle: ThrottleDecision {
                verdict,
                rule_name: "test".into(),
                sample_percent: None,
            },
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_path_saves_and_publishes() {
        let storage: Arc<dyn Storage> = Arc::new(bpcollector_storage::NoopStorage);
        let publish: Arc<dyn Publish> = Arc::new(bpcollector_publish::NoopPublish);
        let metrics = Arc::new(bpcollector_metrics::noop());
        let config = MoverConfig::default();

        let outcome = process(
            sample_report(ThrottleVerdict::Accept),
            storage,
            publish,
            metrics,
            config,
        )
        .await;
        assert_eq!(outcome, MoverOutcome::Done);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn defer_path_never_publishes() {
        struct CountingPublish(AtomicUsize);
        #[async_trait]
        impl Publish for CountingPublish {
            async fn publish(&self, _id: &str) -> Result<(), bpcollector_publish::PublishError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn verify(&self) -> Result<(), bpcollector_publish::PublishError> {
                Ok(())
            }
        }

        let storage: Arc<dyn Storage> = Arc::new(bpcollector_storage::NoopStorage);
        let publish = Arc::new(CountingPublish(AtomicUsize::new(0)));
        let metrics = Arc::new(bpcollector_metrics::noop());

        process(
            sample_report(ThrottleVerdict::Defer),
            storage,
            publish.clone(),
            metrics,
            MoverConfig::default(),
        )
        .await;

        assert_eq!(publish.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn transient_storage_error_is_retried_then_succeeds() {
        let storage: Arc<dyn Storage> = Arc::new(FlakyStorage {
            fail_times: AtomicUsize::new(2),
        });
        let publish: Arc<dyn Publish> = Arc::new(bpcollector_publish::NoopPublish);
        let metrics = Arc::new(bpcollector_metrics::noop());

        let outcome = process(
            sample_report(ThrottleVerdict::Accept),
            storage,
            publish,
            metrics,
            MoverConfig::default(),
        )
        .await;
        assert_eq!(outcome, MoverOutcome::Done);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_and_shutdown_drains_queue() {
        let storage: Arc<dyn Storage> = Arc::new(bpcollector_storage::NoopStorage);
        let publish: Arc<dyn Publish> = Arc::new(bpcollector_publish::NoopPublish);
        let metrics = Arc::new(bpcollector_metrics::noop());
        let config = MoverConfig {
            workers: 2,
            queue_capacity: 4,
            ..MoverConfig::default()
        };

        let (mover, handle) = CrashMover::start(config, storage, publish, metrics);
        for _ in 0..3 {
            handle.enqueue(sample_report(ThrottleVerdict::Accept)).await.unwrap();
        }

        let report = mover.shutdown().await;
        assert_eq!(report.completed, 3);
        assert_eq!(report.abandoned, 0);
    }
}
