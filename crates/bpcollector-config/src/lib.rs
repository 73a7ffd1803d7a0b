// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Assembles a typed [`CollectorConfig`] from environment variables exactly
//! once at startup. There is no process-wide mutable singleton: the binary
//! reads [`CollectorConfig::from_env`] and threads the result through its
//! call graph by value/`Arc`.

use bpcollector_publish::PublishClass;
use bpcollector_storage::StorageClass;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Failure assembling configuration from the process environment. The
/// binary treats this as fatal and exits with a non-zero code.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable was not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable was set but could not be parsed into its target type.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// The offending variable's name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

fn env_opt(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_default(name: &'static str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_owned())
}

fn env_parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("could not parse '{raw}'"),
        }),
    }
}

/// Storage adapter connection parameters, parsed from `CRASHMOVER_CRASHSTORAGE_*`.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Which backend to construct.
    pub class: StorageClass,
    /// Bucket/endpoint URL for the S3 and GCS backends.
    pub endpoint_url: Option<String>,
    /// Root directory for the filesystem backend (reuses `BUCKET_NAME` as the path).
    pub fs_root: Option<PathBuf>,
    /// Static access key for the S3 backend.
    pub access_key: Option<String>,
    /// Static secret key for the S3 backend.
    pub secret_access_key: Option<String>,
}

/// Publish adapter connection parameters, parsed from `CRASHMOVER_CRASHPUBLISH_*`.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Which backend to construct.
    pub class: PublishClass,
    /// Queue or topic URL the adapter sends to.
    pub endpoint_url: Option<String>,
    /// Per-publish deadline.
    pub timeout: Duration,
}

/// Statsd sink parameters, parsed from `STATSD_*`.
#[derive(Debug, Clone)]
pub struct MetricsSettings {
    /// Statsd host. `None` means metrics are disabled (noop client).
    pub host: Option<String>,
    /// Statsd port.
    pub port: u16,
    /// Metric name prefix.
    pub namespace: String,
}

/// Collector policy parameters, parsed from `BREAKPAD_*`.
#[derive(Debug, Clone)]
pub struct PolicySettings {
    /// Multipart field name carrying the primary minidump.
    pub dump_field: String,
    /// Optional path to a TOML throttle rule-set file. Falls back to the
    /// compiled-in default rules over `throttler_products` when unset.
    pub throttler_rules_path: Option<PathBuf>,
    /// Product names accepted by the compiled-in default rule set.
    pub throttler_products: Vec<String>,
    /// Maximum accepted request body size, post gzip-inflation.
    pub max_crash_size: usize,
    /// Maximum accepted size for a single annotation value.
    pub max_annotation_size: usize,
}

/// Everything the `bpcollector-server` binary needs, assembled once from
/// the process environment and handed down by value/`Arc` from `main`.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Socket address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Basic-auth username gating `/__broken__`.
    pub broken_auth_user: Option<String>,
    /// Basic-auth password gating `/__broken__`.
    pub broken_auth_pass: Option<String>,
    /// Crash-mover worker pool size.
    pub concurrent_crashmovers: usize,
    /// Hand-off queue capacity.
    pub max_queue_size: usize,
    /// Submit handler's enqueue deadline. `None` means wait forever.
    pub enqueue_timeout: Option<Duration>,
    /// Bounded retry count for storage saves.
    pub save_retries: u32,
    /// Bounded retry count for publish announces.
    pub publish_retries: u32,
    /// Graceful-shutdown drain deadline.
    pub shutdown_drain: Duration,
    /// Storage adapter settings.
    pub storage: StorageSettings,
    /// Publish adapter settings.
    pub publish: PublishSettings,
    /// Collector policy settings.
    pub policy: PolicySettings,
    /// Metrics sink settings.
    pub metrics: MetricsSettings,
    /// Minimum log level, e.g. `info`, `debug`.
    pub logging_level: String,
    /// Identifier for this host, attached to every log record.
    pub host_id: String,
    /// Opaque DSN for an external error-reporting sink. Unused by this
    /// expansion's tracing-only error path; carried through so the env
    /// surface matches the distilled spec exactly.
    pub secret_sentry_dsn: Option<String>,
}

impl CollectorConfig {
    /// Read and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env_default("COLLECTOR_BIND_ADDR", "0.0.0.0:8080");
        let bind_addr = bind_addr_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "COLLECTOR_BIND_ADDR",
                reason: e.to_string(),
            })?;

        let enqueue_timeout_ms: u64 = env_parsed("CRASHMOVER_ENQUEUE_TIMEOUT_MS", 0)?;
        let enqueue_timeout = if enqueue_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(enqueue_timeout_ms))
        };

        let storage_class_raw = env_default("CRASHMOVER_CRASHSTORAGE_CLASS", "fs");
        let storage_class =
            StorageClass::from_str(&storage_class_raw).map_err(|e| ConfigError::Invalid {
                name: "CRASHMOVER_CRASHSTORAGE_CLASS",
                reason: e.to_string(),
            })?;
        let bucket_name = env_opt("CRASHMOVER_CRASHSTORAGE_BUCKET_NAME");
        let storage = StorageSettings {
            class: storage_class,
            endpoint_url: env_opt("CRASHMOVER_CRASHSTORAGE_ENDPOINT_URL"),
            fs_root: bucket_name.map(PathBuf::from),
            access_key: env_opt("CRASHMOVER_CRASHSTORAGE_ACCESS_KEY"),
            secret_access_key: env_opt("CRASHMOVER_CRASHSTORAGE_SECRET_ACCESS_KEY"),
        };

        let publish_class_raw = env_default("CRASHMOVER_CRASHPUBLISH_CLASS", "noop");
        let publish_class =
            PublishClass::from_str(&publish_class_raw).map_err(|e| ConfigError::Invalid {
                name: "CRASHMOVER_CRASHPUBLISH_CLASS",
                reason: e.to_string(),
            })?;
        let publish_endpoint = env_opt("CRASHMOVER_CRASHPUBLISH_QUEUE_NAME")
            .or_else(|| env_opt("CRASHMOVER_CRASHPUBLISH_TOPIC_NAME"));
        let publish_timeout_secs: u64 = env_parsed("CRASHMOVER_CRASHPUBLISH_TIMEOUT", 5)?;
        let publish = PublishSettings {
            class: publish_class,
            endpoint_url: publish_endpoint,
            timeout: Duration::from_secs(publish_timeout_secs),
        };

        let throttler_products = env_opt("BREAKPAD_THROTTLER_PRODUCTS")
            .map(|raw| raw.split(',').map(|s| s.trim().to_owned()).collect())
            .unwrap_or_default();
        let policy = PolicySettings {
            dump_field: env_default("BREAKPAD_DUMP_FIELD", "upload_file_minidump"),
            throttler_rules_path: env_opt("BREAKPAD_THROTTLER_RULES").map(PathBuf::from),
            throttler_products,
            max_crash_size: env_parsed("BREAKPAD_MAX_CRASH_SIZE", 25 * 1024 * 1024)?,
            max_annotation_size: env_parsed("BREAKPAD_MAX_ANNOTATION_SIZE", 1024 * 1024)?,
        };

        let metrics = MetricsSettings {
            host: env_opt("STATSD_HOST"),
            port: env_parsed("STATSD_PORT", 8125)?,
            namespace: env_default("STATSD_NAMESPACE", "collector"),
        };

        Ok(Self {
            bind_addr,
            broken_auth_user: env_opt("COLLECTOR_BROKEN_AUTH_USER"),
            broken_auth_pass: env_opt("COLLECTOR_BROKEN_AUTH_PASS"),
            concurrent_crashmovers: env_parsed("CRASHMOVER_CONCURRENT_CRASHMOVERS", 8)?,
            max_queue_size: env_parsed("CRASHMOVER_MAX_QUEUE_SIZE", 32)?,
            enqueue_timeout,
            save_retries: env_parsed("CRASHMOVER_SAVE_RETRIES", 5)?,
            publish_retries: env_parsed("CRASHMOVER_PUBLISH_RETRIES", 5)?,
            shutdown_drain: Duration::from_secs(env_parsed("CRASHMOVER_SHUTDOWN_DRAIN_SECONDS", 30)?),
            storage,
            publish,
            policy,
            metrics,
            logging_level: env_default("LOGGING_LEVEL", "info"),
            host_id: env_default("HOST_ID", "unknown"),
            secret_sentry_dsn: env_opt("SECRET_SENTRY_DSN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "COLLECTOR_BIND_ADDR",
            "COLLECTOR_BROKEN_AUTH_USER",
            "COLLECTOR_BROKEN_AUTH_PASS",
            "CRASHMOVER_CONCURRENT_CRASHMOVERS",
            "CRASHMOVER_MAX_QUEUE_SIZE",
            "CRASHMOVER_ENQUEUE_TIMEOUT_MS",
            "CRASHMOVER_SAVE_RETRIES",
            "CRASHMOVER_PUBLISH_RETRIES",
            "CRASHMOVER_SHUTDOWN_DRAIN_SECONDS",
            "CRASHMOVER_CRASHSTORAGE_CLASS",
            "CRASHMOVER_CRASHSTORAGE_BUCKET_NAME",
            "CRASHMOVER_CRASHSTORAGE_ENDPOINT_URL",
            "CRASHMOVER_CRASHSTORAGE_ACCESS_KEY",
            "CRASHMOVER_CRASHSTORAGE_SECRET_ACCESS_KEY",
            "CRASHMOVER_CRASHPUBLISH_CLASS",
            "CRASHMOVER_CRASHPUBLISH_QUEUE_NAME",
            "CRASHMOVER_CRASHPUBLISH_TOPIC_NAME",
            "CRASHMOVER_CRASHPUBLISH_TIMEOUT",
            "BREAKPAD_DUMP_FIELD",
            "BREAKPAD_THROTTLER_RULES",
            "BREAKPAD_THROTTLER_PRODUCTS",
            "BREAKPAD_MAX_CRASH_SIZE",
            "BREAKPAD_MAX_ANNOTATION_SIZE",
            "STATSD_HOST",
            "STATSD_PORT",
            "STATSD_NAMESPACE",
            "LOGGING_LEVEL",
            "HOST_ID",
            "SECRET_SENTRY_DSN",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_produce_a_usable_config_with_no_env_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let config = CollectorConfig::from_env().unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.concurrent_crashmovers, 8);
        assert_eq!(config.storage.class, StorageClass::Fs);
        assert_eq!(config.publish.class, PublishClass::Noop);
        assert_eq!(config.enqueue_timeout, None);
    }

    #[test]
    fn rejects_malformed_bind_addr() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("COLLECTOR_BIND_ADDR", "not-an-addr");
        let err = CollectorConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "COLLECTOR_BIND_ADDR", .. }));
        std::env::remove_var("COLLECTOR_BIND_ADDR");
    }

    #[test]
    fn rejects_unknown_storage_class() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("CRASHMOVER_CRASHSTORAGE_CLASS", "bogus");
        let err = CollectorConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "CRASHMOVER_CRASHSTORAGE_CLASS", .. }));
        std::env::remove_var("CRASHMOVER_CRASHSTORAGE_CLASS");
    }

    #[test]
    fn parses_throttler_products_csv() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("BREAKPAD_THROTTLER_PRODUCTS", "Firefox, Thunderbird");
        let config = CollectorConfig::from_env().unwrap();
        assert_eq!(config.policy.throttler_products, vec!["Firefox", "Thunderbird"]);
        std::env::remove_var("BREAKPAD_THROTTLER_PRODUCTS");
    }

    #[test]
    fn zero_enqueue_timeout_means_wait_forever() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("CRASHMOVER_ENQUEUE_TIMEOUT_MS", "0");
        let config = CollectorConfig::from_env().unwrap();
        assert_eq!(config.enqueue_timeout, None);
        std::env::remove_var("CRASHMOVER_ENQUEUE_TIMEOUT_MS");
    }
}
