// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Structured logging setup: a JSON-formatted `tracing-subscriber` layer
//! filtered by `LOGGING_LEVEL`, plus an optional daily-rotating file sink
//! for deployments that ship logs off the host by tailing a directory
//! rather than stdout.

use std::path::Path;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Failure initializing the global subscriber.
#[derive(Debug, Error)]
pub enum LogError {
    /// The `LOGGING_LEVEL` value did not parse as a tracing filter directive.
    #[error("invalid logging level '{0}'")]
    BadLevel(String),
    /// The subscriber was already installed (e.g. `init` called twice).
    #[error("log subscriber already installed")]
    AlreadyInitialized,
}

/// Holds the non-blocking file appender's worker guard, if one was created.
/// Dropping this flushes and stops the background writer thread, so it must
/// be kept alive for the process's lifetime (bind it in `main`, not a
/// statement expression that drops immediately).
#[must_use = "dropping this stops the background log writer"]
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global `tracing` subscriber.
///
/// `logging_level` is an `EnvFilter` directive (e.g. `"info"`,
/// `"debug,bpcollector_http=trace"`). `host_id` is logged once as a field on
/// the startup record; callers that want it on every record should add a
/// `tracing::Span` of their own and enter it for the process's lifetime.
/// `log_dir`, when set, also writes daily-rotating JSON files there in
/// addition to stdout.
pub fn init(logging_level: &str, host_id: &str, log_dir: Option<&Path>) -> Result<LogGuard, LogError> {
    let filter = EnvFilter::try_new(logging_level)
        .map_err(|_| LogError::BadLevel(logging_level.to_owned()))?;

    let stdout_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let guard = match log_dir {
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .try_init()
                .map_err(|_| LogError::AlreadyInitialized)?;
            LogGuard { _file_guard: None }
        }
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "collector.log");
            let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .map_err(|_| LogError::AlreadyInitialized)?;
            LogGuard {
                _file_guard: Some(file_guard),
            }
        }
    };

    tracing::info!(host_id = %host_id, "collector logging initialized");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_is_rejected() {
        assert!(EnvFilter::try_new("not a valid directive!!").is_err());
    }

    #[test]
    fn init_with_file_dir_creates_a_guard() {
        let dir = tempfile::tempdir().unwrap();
        // A second `init` call in the same process would hit AlreadyInitialized
        // since the global subscriber can only be set once; this test only
        // exercises the guard construction path and leaves installation to the
        // single call below.
        if tracing::dispatcher::has_been_set() {
            return;
        }
        let guard = init("info", "test-host", Some(dir.path()));
        assert!(guard.is_ok());
    }
}
