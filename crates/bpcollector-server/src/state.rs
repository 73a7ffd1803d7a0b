//! Shared state threaded through the router by `Arc`, assembled once in
//! `main` from the loaded [`bpcollector_config::CollectorConfig`].

use bpcollector_config::CollectorConfig;
use bpcollector_metrics::MetricsClient;
use bpcollector_mover::MoverHandle;
use bpcollector_parser::ParseLimits;
use bpcollector_publish::Publish;
use bpcollector_storage::Storage;
use bpcollector_throttle::Throttler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Build metadata surfaced by `GET /__version__`, read from a JSON file next
/// to the binary at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    /// VCS revision the binary was built from.
    pub commit: String,
    /// Crate version.
    pub version: String,
    /// Source repository URL.
    pub source: String,
    /// Build identifier (CI job number, timestamp, or similar).
    pub build: String,
}

impl VersionInfo {
    fn unknown() -> Self {
        Self {
            commit: "unknown".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            source: "unknown".to_owned(),
            build: "unknown".to_owned(),
        }
    }

    /// Read `version.json` next to the running binary, falling back to a
    /// placeholder when it is absent (e.g. local `cargo run`).
    pub fn load_next_to_binary() -> Self {
        let path = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("version.json")));
        let Some(path) = path else {
            return Self::unknown();
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|_| Self::unknown()),
            Err(_) => Self::unknown(),
        }
    }
}

/// Everything a request handler needs, cloned cheaply per request via `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Handle used to enqueue accepted crashes onto the mover's hand-off queue.
    pub mover: MoverHandle,
    /// Compiled throttle rule set.
    pub throttler: Arc<Throttler>,
    /// Dogstatsd client.
    pub metrics: Arc<MetricsClient>,
    /// Storage adapter, invoked directly only by the verifier/heartbeat.
    pub storage: Arc<dyn Storage>,
    /// Publish adapter, invoked directly only by the verifier/heartbeat.
    pub publish: Arc<dyn Publish>,
    /// Loaded configuration.
    pub config: Arc<CollectorConfig>,
    /// Parser size limits, derived from configuration.
    pub parse_limits: ParseLimits,
    /// Build metadata for `GET /__version__`.
    pub version: Arc<VersionInfo>,
}
