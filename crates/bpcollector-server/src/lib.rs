// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires configuration, adapters, and the crash-mover into an [`axum::Router`]
//! implementing the collector's HTTP contract, and runs it to completion.

pub mod augment;
pub mod handlers;
pub mod router;
pub mod shutdown;
pub mod state;

use bpcollector_config::CollectorConfig;
use bpcollector_metrics::{Endpoint, MetricsClient};
use bpcollector_mover::{CrashMover, MoverConfig};
use bpcollector_parser::ParseLimits;
use bpcollector_throttle::Throttler;
use bpcollector_types::{VerifyCheck, VerifyReport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Clean shutdown, hand-off queue fully drained.
pub const EXIT_CLEAN: i32 = 0;
/// Unexpected error, including a shutdown drain that timed out with work
/// still abandoned.
pub const EXIT_UNEXPECTED: i32 = 1;
/// Startup verification of storage or publish failed.
pub const EXIT_VERIFY_FAILED: i32 = 3;
/// Configuration or adapter construction failed before the server bound.
pub const EXIT_CONFIG_FAILED: i32 = 4;

/// Loads adapters, starts the crash-mover, serves the collector's HTTP
/// contract until a termination signal arrives, then drains and returns an
/// exit code per the codes above.
pub async fn run(config: CollectorConfig) -> i32 {
    let config = Arc::new(config);

    let metrics = Arc::new(build_metrics(&config));

    let storage = match bpcollector_storage::build(
        config.storage.class,
        config.storage.endpoint_url.clone(),
        config.storage.fs_root.clone(),
        config.storage.access_key.clone(),
        config.storage.secret_access_key.clone(),
        Duration::from_secs(10),
    ) {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "failed to construct storage adapter");
            return EXIT_CONFIG_FAILED;
        }
    };

    let publish = match bpcollector_publish::build(
        config.publish.class,
        config.publish.endpoint_url.clone(),
        config.publish.timeout,
    ) {
        Ok(publish) => publish,
        Err(err) => {
            error!(error = %err, "failed to construct publish adapter");
            return EXIT_CONFIG_FAILED;
        }
    };

    if let Err(report) = verify_adapters(&storage, &publish).await {
        for check in &report.checks {
            if !check.ok {
                error!(check = %check.name, detail = ?check.detail, "startup verification failed");
            }
        }
        return EXIT_VERIFY_FAILED;
    }
    info!("startup verification passed");

    let throttler = match build_throttler(&config) {
        Ok(throttler) => Arc::new(throttler),
        Err(err) => {
            error!(error = %err, "failed to load throttle rule set");
            return EXIT_CONFIG_FAILED;
        }
    };

    let mover_config = MoverConfig {
        workers: config.concurrent_crashmovers,
        queue_capacity: config.max_queue_size,
        enqueue_timeout: config.enqueue_timeout,
        save_retries: config.save_retries,
        publish_retries: config.publish_retries,
        shutdown_drain: config.shutdown_drain,
    };
    let (mover, mover_handle) =
        CrashMover::start(mover_config, storage.clone(), publish.clone(), metrics.clone());

    let parse_limits = ParseLimits {
        max_crash_size: config.policy.max_crash_size,
        max_annotation_size: config.policy.max_annotation_size,
    };

    let app_state = state::AppState {
        mover: mover_handle,
        throttler,
        metrics,
        storage,
        publish,
        config: config.clone(),
        parse_limits,
        version: Arc::new(state::VersionInfo::load_next_to_binary()),
    };

    let app = router::build(app_state);

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %config.bind_addr, "failed to bind listener");
            return EXIT_CONFIG_FAILED;
        }
    };
    info!(addr = %config.bind_addr, "collector listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for_termination())
        .await;

    if let Err(err) = serve_result {
        error!(error = %err, "http server error");
    }

    info!("draining hand-off queue before exit");
    let drain = mover.shutdown().await;
    if drain.abandoned > 0 {
        error!(abandoned = drain.abandoned, completed = drain.completed, "shutdown drain deadline exceeded");
        return EXIT_UNEXPECTED;
    }
    info!(completed = drain.completed, "clean shutdown");
    EXIT_CLEAN
}

fn build_metrics(config: &CollectorConfig) -> MetricsClient {
    match &config.metrics.host {
        Some(host) => bpcollector_metrics::new(Endpoint::new(host.clone(), config.metrics.port)),
        None => bpcollector_metrics::noop(),
    }
}

fn build_throttler(config: &CollectorConfig) -> Result<Throttler, bpcollector_throttle::ThrottleError> {
    match &config.policy.throttler_rules_path {
        Some(path) => Throttler::load_from_file(path),
        None => Throttler::from_rules(Throttler::default_rules(&config.policy.throttler_products)),
    }
}

async fn verify_adapters(
    storage: &Arc<dyn bpcollector_storage::Storage>,
    publish: &Arc<dyn bpcollector_publish::Publish>,
) -> Result<(), VerifyReport> {
    let storage_result = storage.verify().await;
    let publish_result = publish.verify().await;

    let report = VerifyReport {
        checks: vec![
            VerifyCheck {
                name: "storage".to_owned(),
                ok: storage_result.is_ok(),
                detail: storage_result.err().map(|e| e.to_string()),
            },
            VerifyCheck {
                name: "publish".to_owned(),
                ok: publish_result.is_ok(),
                detail: publish_result.err().map(|e| e.to_string()),
            },
        ],
    };

    if report.all_ok() {
        Ok(())
    } else {
        Err(report)
    }
}
