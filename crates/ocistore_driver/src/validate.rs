//! Path-validating driver wrapper.
//!
//! Every backend trusts that the paths it receives are already sane; this
//! wrapper is what makes that true. It is composed explicitly around an
//! inner [`Driver`] rather than implemented as a base struct the backends
//! embed, so a caller can see at the construction site exactly which driver
//! is validated and which (if any) isn't.

use async_trait::async_trait;
use bytes::Bytes;

use ocistore_core::errors::Result;
use ocistore_core::path::validate_driver_path;

use crate::{BoxReader, Driver, FileInfo, UrlForOptions, Writer};

/// Wraps `inner`, rejecting any path that fails
/// [`ocistore_core::path::validate_driver_path`] before delegating.
#[derive(Debug)]
pub struct PathValidatingDriver<D> {
    inner: D,
}

impl<D: Driver> PathValidatingDriver<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

#[async_trait]
impl<D: Driver> Driver for PathValidatingDriver<D> {
    async fn get_content(&self, path: &str) -> Result<Bytes> {
        validate_driver_path(path, false)?;
        self.inner.get_content(path).await
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        validate_driver_path(path, false)?;
        self.inner.put_content(path, content).await
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<BoxReader> {
        validate_driver_path(path, false)?;
        self.inner.reader(path, offset).await
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn Writer>> {
        validate_driver_path(path, false)?;
        self.inner.writer(path, append).await
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        validate_driver_path(path, true)?;
        self.inner.stat(path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        validate_driver_path(path, true)?;
        self.inner.list(path).await
    }

    async fn move_to(&self, src: &str, dst: &str) -> Result<()> {
        validate_driver_path(src, false)?;
        validate_driver_path(dst, false)?;
        self.inner.move_to(src, dst).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_driver_path(path, false)?;
        self.inner.delete(path).await
    }

    async fn url_for(&self, path: &str, opts: &UrlForOptions) -> Result<String> {
        validate_driver_path(path, false)?;
        self.inner.url_for(path, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FilesystemDriver;

    #[tokio::test]
    async fn rejects_relative_path_before_reaching_inner() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = PathValidatingDriver::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        let err = driver.get_content("../etc/passwd").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PATH");
    }

    #[tokio::test]
    async fn accepts_well_formed_path_and_delegates() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = PathValidatingDriver::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        driver
            .put_content("/blobs/a.txt", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        let got = driver.get_content("/blobs/a.txt").await.unwrap();
        assert_eq!(got, Bytes::from_static(b"hi"));
    }
}
