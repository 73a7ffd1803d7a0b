// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry point: loads configuration, then hands off to
//! [`bpcollector_server::run`] on a multi-threaded tokio runtime.

use anyhow::Context;
use bpcollector_config::CollectorConfig;
use bpcollector_server::{EXIT_CONFIG_FAILED, EXIT_UNEXPECTED};
use tracing::error;

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal: {err:#}");
            std::process::exit(EXIT_CONFIG_FAILED);
        }
    };

    let _log_guard = match bpcollector_log::init(&config.logging_level, &config.host_id, None) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("fatal: failed to initialize logging: {err}");
            std::process::exit(EXIT_CONFIG_FAILED);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to build tokio runtime");
            std::process::exit(EXIT_UNEXPECTED);
        }
    };

    let exit_code = runtime.block_on(bpcollector_server::run(config));
    std::process::exit(exit_code);
}

fn load_config() -> anyhow::Result<CollectorConfig> {
    CollectorConfig::from_env().context("loading collector configuration from the environment")
}
