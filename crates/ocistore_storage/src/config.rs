//! Blob-service level configuration layered on top of a driver config.
//!
//! Shaped the same way as `ocistore_driver::config::Config` — a plain
//! `serde`-deserialized struct loaded straight out of the YAML document
//! `ocistore`'s binary reads at startup.

use std::time::Duration;

use serde::Deserialize;

use ocistore_driver::config::Config as DriverConfig;

#[derive(Clone, Deserialize)]
pub struct BlobServiceConfig {
    pub driver: DriverConfig,

    /// The intended behavior of a DELETE on a committed blob is
    /// deployment-specific; some deployments disable blob deletion
    /// entirely. Resolved (see `DESIGN.md`) by gating DELETE behind this
    /// flag, off by default.
    #[serde(default)]
    pub deletes_enabled: bool,

    /// Sessions untouched for a configured duration are reaped
    /// asynchronously via Cancel.
    #[serde(default = "default_session_ttl_seconds", rename = "session_ttl_seconds")]
    pub session_ttl_seconds: u64,

    /// How often the reaper sweeps the session table looking for expired
    /// uploads. A sensible default tied to the TTL keeps the sweep from
    /// being either a busy-loop or a multi-hour blind spot.
    #[serde(default = "default_reap_interval_seconds", rename = "reap_interval_seconds")]
    pub reap_interval_seconds: u64,
}

fn default_session_ttl_seconds() -> u64 {
    8 * 60 * 60
}

fn default_reap_interval_seconds() -> u64 {
    5 * 60
}

impl BlobServiceConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }
}
