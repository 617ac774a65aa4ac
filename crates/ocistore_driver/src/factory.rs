//! Driver factory and self-check.
//!
//! A [`Registry`] maps a backend name (`"filesystem"`, `"s3"`, ...) to a
//! [`DriverFactory`] that can build it from a [`crate::config::Config`]
//! variant. `Registry::create` always runs the self-check probe before
//! handing the driver back, so a misconfigured backend fails at startup
//! rather than on the first real request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::RngCore;

use ocistore_core::errors::{Error, Result};

use crate::Driver;

/// Builds one concrete [`Driver`] from its configuration.
#[async_trait::async_trait]
pub trait DriverFactory: Send + Sync {
    async fn build(&self, config: &crate::config::Config) -> Result<Arc<dyn Driver>>;
}

/// The stock factory registered under each of `"filesystem"`, `"webhdfs"`,
/// and `"s3"`: it simply defers to [`crate::config::Config::new_driver`].
/// Kept separate from `Config` itself so a caller embedding this crate can
/// register an alternative factory (e.g. one that injects a mock driver
/// in tests) under the same name.
pub struct ConfigFactory;

#[async_trait::async_trait]
impl DriverFactory for ConfigFactory {
    async fn build(&self, config: &crate::config::Config) -> Result<Arc<dyn Driver>> {
        config.new_driver().await
    }
}

/// Name-keyed collection of backend constructors plus the self-check.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn DriverFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Registers [`ConfigFactory`] under each backend name this workspace
    /// ships.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in ["filesystem", "webhdfs", "s3", "ipc"] {
            registry.register(name, Arc::new(ConfigFactory));
        }
        registry
    }

    /// Builds the driver named by `config` and runs [`self_check`] on it.
    ///
    /// Construction must self-check the backend before returning: write a
    /// probe object, poll `Stat` until it is visible (bounded exponential
    /// backoff), read it back and compare, then delete it. Any failing
    /// step is a structural startup error, not a per-request one.
    pub async fn create(&self, name: &str, config: &crate::config::Config) -> Result<Arc<dyn Driver>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::invalid_path(name).with_detail("reason", "no driver registered under this name")
        })?;
        let driver = factory.build(config).await?;
        self_check(driver.as_ref()).await?;
        Ok(driver)
    }
}

/// Exponential backoff schedule for the `Stat` poll: 10ms, doubling, capped
/// at 3s, with up to 25% jitter.
fn backoff_schedule() -> impl Iterator<Item = Duration> {
    let mut delay = Duration::from_millis(10);
    let cap = Duration::from_secs(3);
    std::iter::from_fn(move || {
        let mut rng = rand::thread_rng();
        let jitter_pct = rng.next_u32() % 25;
        let jittered = delay + delay * jitter_pct / 100;
        let next = delay.saturating_mul(2).min(cap);
        delay = next;
        Some(jittered)
    })
}

const SELF_CHECK_MAX_POLLS: usize = 8;

/// Writes a random probe object, polls for it to become visible, reads it
/// back, and deletes it. Used both at driver-construction time and by
/// `ocistore-conformance`'s harness.
pub async fn self_check(driver: &dyn Driver) -> Result<()> {
    let probe_path = format!("/_selfcheck/{}", uuid::Uuid::new_v4());
    let mut payload = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut payload);
    let payload = Bytes::from(payload);

    driver
        .put_content(&probe_path, payload.clone())
        .await
        .map_err(|e| e.with_detail("self_check_step", "put_content"))?;

    let mut polls = backoff_schedule().take(SELF_CHECK_MAX_POLLS);
    loop {
        match driver.stat(&probe_path).await {
            Ok(_) => break,
            Err(e) if e.is_retryable() => match polls.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(e.with_detail("self_check_step", "stat_poll_exhausted"));
                }
            },
            Err(e) => return Err(e.with_detail("self_check_step", "stat")),
        }
    }

    let read_back = driver
        .get_content(&probe_path)
        .await
        .map_err(|e| e.with_detail("self_check_step", "get_content"))?;
    if read_back != payload {
        let _ = driver.delete(&probe_path).await;
        return Err(Error::transport("self-check read-back mismatch")
            .with_detail("self_check_step", "compare"));
    }

    driver
        .delete(&probe_path)
        .await
        .map_err(|e| e.with_detail("self_check_step", "delete"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FilesystemDriver;

    #[tokio::test]
    async fn self_check_passes_against_filesystem_driver() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(tmp.path().to_path_buf());
        self_check(&driver).await.unwrap();
    }
}
