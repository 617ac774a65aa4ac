//! The Upload Session Manager.
//!
//! Owns every in-progress [`UploadSession`] in a concurrent `uuid ->
//! session` map. Each session is additionally wrapped in its own
//! `tokio::sync::Mutex` so that concurrent requests against the *same*
//! session serialize — a single Writer is not safe for concurrent use —
//! while requests against different sessions never contend on a shared
//! lock: per-session locking, no global bottleneck.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use ocistore_core::errors::{Error, Result};
use ocistore_core::path::{staging_data_path, staging_prefix, RepositoryName};
use ocistore_driver::Driver;

use crate::blobs::BlobService;
use crate::session::UploadSession;

pub struct UploadSessionManager {
    driver: Arc<dyn Driver>,
    blobs: Arc<BlobService>,
    sessions: DashMap<Uuid, Arc<Mutex<UploadSession>>>,
    ttl: Duration,
}

impl UploadSessionManager {
    pub fn new(driver: Arc<dyn Driver>, blobs: Arc<BlobService>, ttl: Duration) -> Self {
        Self {
            driver,
            blobs,
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// `Initiate(repo)` -> `(uuid, location)`. Creates a fresh Writer over
    /// the staging path `_uploads/<uuid>/data`.
    pub async fn initiate(&self, repository: &RepositoryName) -> Result<Uuid> {
        let uuid = Uuid::new_v4();
        let writer = self.driver.writer(&staging_data_path(&uuid), false).await?;
        let session = UploadSession::new(uuid, repository.clone(), writer);
        self.sessions.insert(uuid, Arc::new(Mutex::new(session)));
        tracing::debug!(%uuid, repository = repository.as_str(), "upload session initiated");
        Ok(uuid)
    }

    fn lookup(&self, uuid: &Uuid) -> Result<Arc<Mutex<UploadSession>>> {
        self.sessions
            .get(uuid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::BlobUploadUnknown {
                    detail: Default::default(),
                }
                .with_detail("uuid", uuid.to_string())
            })
    }

    /// `Status(uuid)` -> `bytes_received`.
    pub async fn status(&self, uuid: &Uuid) -> Result<u64> {
        let session = self.lookup(uuid)?;
        let session = session.lock().await;
        Ok(session.bytes_received())
    }

    /// `Append`. The range's inclusive end is the caller's business (the
    /// HTTP layer uses it to size the read); this layer only needs the
    /// start offset to enforce that writes land contiguously.
    pub async fn append(&self, uuid: &Uuid, range_start: u64, data: Bytes) -> Result<u64> {
        let session_handle = self.lookup(uuid)?;
        let mut session = session_handle.lock().await;
        let bytes_received = session.append(range_start, data).await?;

        if let Err(e) = self.persist_hash_snapshot(&session).await {
            tracing::warn!(%uuid, error = %e, "failed to persist hash state snapshot");
        }

        Ok(bytes_received)
    }

    /// Serializes the running hash into `hashstates/<algo>/<N>` after each
    /// successful PATCH. `N` is the byte offset the snapshot was taken at,
    /// which is both unique per session and directly useful when picking
    /// the newest snapshot back up on resume.
    async fn persist_hash_snapshot(&self, session: &UploadSession) -> Result<()> {
        let snapshot = session.hash_snapshot();
        let encoded = serde_json::to_vec(&snapshot).map_err(Error::transport)?;
        let path = ocistore_core::path::hashstate_path(&session.uuid(), "sha256", session.bytes_received());
        self.driver.put_content(&path, Bytes::from(encoded)).await
    }

    /// `Commit`: optionally appends trailing bytes, closes the Writer,
    /// verifies the digest, moves staging to the content address via
    /// [`BlobService`], and deletes the session either way.
    pub async fn commit(
        &self,
        uuid: &Uuid,
        digest: &ocistore_core::digest::Digest,
        trailing: Option<Bytes>,
    ) -> Result<String> {
        let session_handle = self.lookup(uuid)?;
        let mut session = session_handle.lock().await;

        if let Some(data) = trailing {
            let start = session.bytes_received();
            session.append(start, data).await?;
        }

        let outcome = match session.verify_and_close(digest).await {
            Ok(()) => session.finalize_writer().await,
            Err(e) => Err(e),
        };

        drop(session);
        self.sessions.remove(uuid);

        match outcome {
            Ok(()) => {
                let staging = staging_data_path(uuid);
                let final_path = self.blobs.adopt_staged(&staging, digest).await?;
                self.cleanup_staging(uuid).await;
                Ok(final_path)
            }
            Err(e) => {
                self.cleanup_staging(uuid).await;
                Err(e)
            }
        }
    }

    /// `Cancel`, and the target of asynchronous TTL reaping. Idempotent
    /// against a concurrently-racing client request: once a session is
    /// removed from the map, a second `Cancel` sees `BlobUploadUnknown`
    /// rather than double-cancelling the writer.
    pub async fn cancel(&self, uuid: &Uuid) -> Result<()> {
        let (_, session_handle) = self.sessions.remove(uuid).ok_or_else(|| {
            Error::BlobUploadUnknown {
                detail: Default::default(),
            }
            .with_detail("uuid", uuid.to_string())
        })?;
        let mut session = session_handle.lock().await;
        session.cancel().await?;
        drop(session);
        self.cleanup_staging(uuid).await;
        Ok(())
    }

    async fn cleanup_staging(&self, uuid: &Uuid) {
        if let Err(e) = self.driver.delete(&staging_prefix(uuid)).await {
            tracing::warn!(%uuid, error = %e, "failed to reclaim staging prefix");
        }
    }

    /// Sessions untouched for a configured duration are reaped
    /// asynchronously via Cancel. Reaping must be idempotent against a
    /// concurrent client request. Intended to be driven by a periodic
    /// `tokio::time::interval` loop in the hosting binary (see
    /// `ocistore`'s `main.rs`).
    pub async fn reap_expired(&self) {
        let now = SystemTime::now();
        // `try_lock` rather than awaiting each session's mutex: a session
        // currently mid-PATCH is, by definition, not idle, so skipping it
        // this sweep and catching it on the next one is correct and avoids
        // the reaper blocking on in-flight request traffic.
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let guard = entry.value().try_lock().ok()?;
                let elapsed = now.duration_since(guard.last_activity()).ok()?;
                (elapsed > self.ttl).then_some(*entry.key())
            })
            .collect();

        for uuid in expired {
            tracing::info!(%uuid, "reaping expired upload session");
            if let Err(e) = self.cancel(&uuid).await {
                tracing::debug!(%uuid, error = %e, "expired session already gone by the time the reaper ran");
            }
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use ocistore_driver::filesystem::FilesystemDriver;

    use super::*;

    fn repo(name: &str) -> RepositoryName {
        RepositoryName::try_from(name).unwrap()
    }

    async fn manager(root: &std::path::Path) -> UploadSessionManager {
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(root.to_path_buf()));
        let blobs = Arc::new(BlobService::new(driver.clone(), true));
        UploadSessionManager::new(driver, blobs, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn two_chunk_upload_commits_to_expected_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path()).await;

        let uuid = mgr.initiate(&repo("library/nginx")).await.unwrap();
        let n1 = mgr.append(&uuid, 0, Bytes::from_static(b"abcde")).await.unwrap();
        assert_eq!(n1, 5);
        let n2 = mgr.append(&uuid, 5, Bytes::from_static(b"fghij")).await.unwrap();
        assert_eq!(n2, 10);

        let mut hasher = crate::hashstate::StreamingSha256::new();
        hasher.update(b"abcdefghij");
        let digest = ocistore_core::digest::Digest::try_from(
            format!("sha256:{}", crate::hashstate::hex_encode(&hasher.finalize())).as_str(),
        )
        .unwrap();

        let final_path = mgr.commit(&uuid, &digest, None).await.unwrap();
        assert_eq!(final_path, ocistore_core::path::canonical_blob_path(&digest));
        assert_eq!(mgr.active_session_count(), 0);
    }

    #[tokio::test]
    async fn out_of_order_patch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path()).await;

        let uuid = mgr.initiate(&repo("library/nginx")).await.unwrap();
        mgr.append(&uuid, 0, Bytes::from_static(b"abcde")).await.unwrap();

        let err = mgr
            .append(&uuid, 10, Bytes::from_static(b"xxxxx"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_OFFSET");
        assert_eq!(mgr.status(&uuid).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn cancel_then_cancel_is_not_idempotent_at_the_manager_level() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path()).await;

        let uuid = mgr.initiate(&repo("library/nginx")).await.unwrap();
        mgr.append(&uuid, 0, Bytes::from_static(b"partial")).await.unwrap();
        mgr.cancel(&uuid).await.unwrap();

        let err = mgr.cancel(&uuid).await.unwrap_err();
        assert_eq!(err.code(), "BLOB_UPLOAD_UNKNOWN");
        assert_eq!(mgr.status(&uuid).await.unwrap_err().code(), "BLOB_UPLOAD_UNKNOWN");
    }

    #[tokio::test]
    async fn digest_mismatch_on_commit_leaves_no_final_blob() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path()).await;

        let uuid = mgr.initiate(&repo("library/nginx")).await.unwrap();
        mgr.append(&uuid, 0, Bytes::from_static(b"hello")).await.unwrap();

        let wrong = ocistore_core::digest::Digest::try_from(
            "sha256:0000000000000000000000000000000000000000000000000000000000000000",
        )
        .unwrap();
        let err = mgr.commit(&uuid, &wrong, None).await.unwrap_err();
        assert_eq!(err.code(), "DIGEST_INVALID");
        assert_eq!(mgr.active_session_count(), 0);
    }
}
