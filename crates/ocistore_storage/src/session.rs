//! The server-side Upload Session entity.

use std::time::SystemTime;

use bytes::Bytes;
use uuid::Uuid;

use ocistore_core::digest::Digest;
use ocistore_core::errors::{Error, Result};
use ocistore_core::path::{staging_data_path, RepositoryName};
use ocistore_driver::writer::WriterState;
use ocistore_driver::Writer;

use crate::hashstate::{HashSnapshot, StreamingSha256};

/// Tuple `(uuid, repository, created_at, driver_handle, bytes_received,
/// last_activity)`. The session stores a monotonically increasing
/// `expected_next_offset` that every PATCH must match.
pub struct UploadSession {
    uuid: Uuid,
    repository: RepositoryName,
    created_at: SystemTime,
    last_activity: SystemTime,
    writer: Box<dyn Writer>,
    hasher: StreamingSha256,
    bytes_received: u64,
}

impl UploadSession {
    pub fn new(uuid: Uuid, repository: RepositoryName, writer: Box<dyn Writer>) -> Self {
        let now = SystemTime::now();
        Self {
            uuid,
            repository,
            created_at: now,
            last_activity: now,
            writer,
            hasher: StreamingSha256::new(),
            bytes_received: 0,
        }
    }

    /// Reconstruct a session whose writer is already positioned at
    /// `bytes_received` (e.g. resumed against an append-capable driver)
    /// and whose running hash is restored from a persisted snapshot.
    pub fn resume(
        uuid: Uuid,
        repository: RepositoryName,
        writer: Box<dyn Writer>,
        bytes_received: u64,
        snapshot: HashSnapshot,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            uuid,
            repository,
            created_at: now,
            last_activity: now,
            writer,
            hasher: StreamingSha256::from_snapshot(snapshot),
            bytes_received,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn repository(&self) -> &RepositoryName {
        &self.repository
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_activity(&self) -> SystemTime {
        self.last_activity
    }

    /// Validates that `content_range.start == bytes_received`; streams to
    /// the Writer; updates `bytes_received`; fails on mismatch. The error
    /// taxonomy has no distinct `InvalidRange` kind — `InvalidOffset`
    /// (416) covers exactly this "offset out of bounds" shape, so appends
    /// reuse it.
    pub async fn append(&mut self, range_start: u64, data: Bytes) -> Result<u64> {
        if range_start != self.bytes_received {
            return Err(
                Error::invalid_offset(staging_data_path(&self.uuid), range_start)
                    .with_detail("expected_next_offset", self.bytes_received.to_string()),
            );
        }

        self.hasher.update(&data);
        let n = self.writer.write(data).await?;
        self.bytes_received += n as u64;
        self.last_activity = SystemTime::now();
        Ok(self.bytes_received)
    }

    /// A snapshot of the running hash state as of the last successful
    /// `append`, for `_uploads/<uuid>/hashstates/sha256/<N>` persistence.
    pub fn hash_snapshot(&self) -> HashSnapshot {
        self.hasher.snapshot()
    }

    /// Close the writer and verify the fully-assembled stream's hash
    /// against `digest`. A mismatch reports `DigestInvalid` and cancels
    /// the staging, so the writer is cancelled before the error is
    /// returned rather than left `Closed`.
    pub async fn verify_and_close(&mut self, digest: &Digest) -> Result<()> {
        self.writer.close().await?;

        let computed_hex = crate::hashstate::hex_encode(&self.hasher.clone().finalize());
        let computed = Digest::try_from(format!("sha256:{computed_hex}").as_str())?;

        if &computed != digest {
            let _ = self.writer.cancel().await;
            return Err(Error::digest_invalid(digest.to_string())
                .with_detail("actual", computed.to_string()));
        }
        Ok(())
    }

    /// Finalize the writer once [`Self::verify_and_close`] has already
    /// confirmed the digest matches.
    pub async fn finalize_writer(&mut self) -> Result<()> {
        self.writer.commit(Some(self.bytes_received)).await
    }

    pub async fn cancel(&mut self) -> Result<()> {
        match self.writer.state() {
            WriterState::Cancelled => {
                Err(Error::writer_closed("cancelled").with_detail("uuid", self.uuid.to_string()))
            }
            _ => self.writer.cancel().await,
        }
    }
}
