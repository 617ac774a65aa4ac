//! The content-addressed Blob Service.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use ocistore_core::digest::{Algorithm, Digest};
use ocistore_core::errors::{Error, Result};
use ocistore_core::path::canonical_blob_path;
use ocistore_driver::{BoxReader, Driver, FileInfo, UrlForOptions};

use crate::hashstate::{hex_encode, StreamingSha256};

/// Same backoff shape as the driver factory's self-check: 10ms initial,
/// doubling, capped at 3s, bounded number of polls.
const STAT_AFTER_MOVE_MAX_POLLS: usize = 8;

pub struct BlobService {
    driver: Arc<dyn Driver>,
    deletes_enabled: bool,
}

impl BlobService {
    pub fn new(driver: Arc<dyn Driver>, deletes_enabled: bool) -> Self {
        Self {
            driver,
            deletes_enabled,
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Monolithic upload: `Put(digest, reader)`. Streams `reader` into a
    /// staging path, hashing as it goes, and only moves the bytes under
    /// their claimed digest if the hash matches.
    pub async fn put(&self, digest: &Digest, mut reader: impl AsyncRead + Unpin + Send) -> Result<()> {
        if digest.algorithm() != Algorithm::Sha256 {
            return Err(Error::digest_unsupported(digest.to_string())
                .with_detail("reason", "new uploads must be sha256"));
        }

        let staging_path = format!("/_uploads/put/{}/data", uuid::Uuid::new_v4());
        let mut writer = self.driver.writer(&staging_path, false).await?;
        let mut hasher = StreamingSha256::new();
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buf).await.map_err(Error::transport)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write(Bytes::copy_from_slice(&buf[..n])).await?;
        }
        writer.close().await?;

        let computed = Digest::try_from(format!("sha256:{}", hex_encode(&hasher.finalize())).as_str())?;
        if &computed != digest {
            let _ = writer.cancel().await;
            let _ = self.driver.delete(&staging_path).await;
            return Err(Error::digest_invalid(digest.to_string())
                .with_detail("actual", computed.to_string()));
        }

        writer.commit(None).await?;
        self.adopt_staged(&staging_path, digest).await?;
        Ok(())
    }

    /// Move already-verified bytes from a staging path to the canonical
    /// content-addressed path, then wait out the eventual-consistency
    /// window before returning. A successful Commit happens-before any
    /// subsequent Get returning the committed bytes; for backends with
    /// eventual consistency, the Blob Service retries Stat-after-Move
    /// with bounded back-off.
    pub(crate) async fn adopt_staged(&self, staging_path: &str, digest: &Digest) -> Result<String> {
        let final_path = canonical_blob_path(digest);
        self.driver.move_to(staging_path, &final_path).await?;
        self.wait_until_visible(&final_path).await?;
        Ok(final_path)
    }

    async fn wait_until_visible(&self, path: &str) -> Result<()> {
        let mut delay = Duration::from_millis(10);
        let cap = Duration::from_secs(3);
        for _ in 0..STAT_AFTER_MOVE_MAX_POLLS {
            match self.driver.stat(path).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(cap);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::transport(
            "stat-after-move did not observe the object within the eventual-consistency window",
        )
        .with_detail("path", path.to_string()))
    }

    pub async fn get(&self, digest: &Digest) -> Result<BoxReader> {
        self.driver
            .reader(&canonical_blob_path(digest), 0)
            .await
            .map_err(blob_unknown_if_missing)
    }

    pub async fn stat(&self, digest: &Digest) -> Result<FileInfo> {
        self.driver
            .stat(&canonical_blob_path(digest))
            .await
            .map_err(blob_unknown_if_missing)
    }

    /// Signed URL for a GET/HEAD redirect, when the driver supports it
    /// and the caller indicated willingness.
    pub async fn url_for(&self, digest: &Digest, opts: &UrlForOptions) -> Result<String> {
        self.driver
            .url_for(&canonical_blob_path(digest), opts)
            .await
            .map_err(blob_unknown_if_missing)
    }

    /// DELETE is gated behind `deletes_enabled` (off by default).
    pub async fn delete(&self, digest: &Digest) -> Result<()> {
        if !self.deletes_enabled {
            return Err(Error::unsupported_method()
                .with_detail("reason", "blob deletion is disabled for this deployment"));
        }
        self.driver
            .delete(&canonical_blob_path(digest))
            .await
            .map_err(blob_unknown_if_missing)
    }
}

fn blob_unknown_if_missing(e: Error) -> Error {
    match e {
        Error::PathNotFound { detail, .. } => Error::BlobUnknown { detail },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use ocistore_driver::filesystem::FilesystemDriver;

    use super::*;

    fn sha256_of(data: &[u8]) -> Digest {
        let mut hasher = StreamingSha256::new();
        hasher.update(data);
        Digest::try_from(format!("sha256:{}", hex_encode(&hasher.finalize())).as_str()).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        let service = BlobService::new(driver, true);

        let digest = sha256_of(b"hello");
        service.put(&digest, Cursor::new(b"hello".to_vec())).await.unwrap();

        let mut reader = service.get(&digest).await.unwrap();
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn put_rejects_digest_mismatch_and_leaves_no_final_path() {
        let tmp = tempfile::tempdir().unwrap();
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        let service = BlobService::new(driver, true);

        let wrong = Digest::try_from(
            "sha256:0000000000000000000000000000000000000000000000000000000000000000",
        )
        .unwrap();
        let err = service
            .put(&wrong, Cursor::new(b"hello".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DIGEST_INVALID");

        let err = service.stat(&wrong).await.unwrap_err();
        assert_eq!(err.code(), "BLOB_UNKNOWN");
    }

    #[tokio::test]
    async fn delete_disabled_by_default_semantics() {
        let tmp = tempfile::tempdir().unwrap();
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        let service = BlobService::new(driver, false);

        let digest = sha256_of(b"hello");
        let err = service.delete(&digest).await.unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED");
    }
}
