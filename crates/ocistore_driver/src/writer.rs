//! The cross-driver resumable-upload abstraction.
//!
//! `Driver::writer` hands back one of these instead of a raw file handle so
//! that backends which cannot `write(2)` at an arbitrary offset (S3-family
//! multipart uploads) can still participate in the same resumable-upload
//! protocol as a backend that can (filesystem, WebHDFS). Every concrete
//! writer drives the same four-state machine; only how it turns buffered
//! bytes into backend calls differs.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use ocistore_core::errors::{Error, Result};

/// `Write` is valid only in `Open`; `Close`/`Commit`/`Cancel` are each
/// valid only once and move the writer to a terminal state except
/// `Close`, which may be followed by `Commit` or `Cancel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Open,
    Closed,
    Committed,
    Cancelled,
}

impl WriterState {
    fn label(self) -> &'static str {
        match self {
            WriterState::Open => "open",
            WriterState::Closed => "closed",
            WriterState::Committed => "committed",
            WriterState::Cancelled => "cancelled",
        }
    }
}

/// A resumable, append-only destination for blob bytes.
///
/// `size()` reports bytes accepted so far (a session's `bytes_received`),
/// not necessarily bytes durable at the backend — a writer is free to
/// buffer internally and only flush on `close`/`commit`.
#[async_trait]
pub trait Writer: Send {
    /// Append `data` at the writer's current offset. Must fail with
    /// [`Error::WriterClosed`] unless the writer is `Open`.
    async fn write(&mut self, data: Bytes) -> Result<usize>;

    /// Bytes accepted via `write` so far.
    fn size(&self) -> u64;

    /// Flush buffered bytes and stop accepting writes, without finalizing
    /// the upload. Valid from `Open` only; moves to `Closed`.
    async fn close(&mut self) -> Result<()>;

    /// Finalize the upload, making the written bytes visible at the
    /// destination path. Valid from `Open` or `Closed`; moves to
    /// `Committed`. `size_hint`, when given, lets multipart backends
    /// validate the part count/sizes they assembled.
    async fn commit(&mut self, size_hint: Option<u64>) -> Result<()>;

    /// Abort the upload and discard any bytes written so far. Valid from
    /// `Open` or `Closed`; moves to `Cancelled`.
    async fn cancel(&mut self) -> Result<()>;

    fn state(&self) -> WriterState;
}

/// Guards a state transition, returning [`Error::WriterClosed`] if `from`
/// isn't one of `allowed`.
pub(crate) fn require_state(current: WriterState, allowed: &[WriterState]) -> Result<()> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(Error::writer_closed(current.label()))
    }
}

/// Chunk buffering for multipart backends (S3-family). Bytes accumulate in
/// `pending` until a full chunk is available, at which point it moves into
/// `held` rather than shipping immediately: a chunk just filled might still
/// turn out to be the final part of the upload, which is exempt from the
/// minimum part size, so it cannot be uploaded as a regular part yet. Only
/// once a *later* chunk also fills does the previously `held` chunk become
/// provably non-final and get released to the caller for upload.
#[derive(Debug, Default)]
pub struct PartBuffer {
    pending: BytesMut,
    held: Option<Bytes>,
    min_part_size: usize,
}

impl PartBuffer {
    pub fn new(min_part_size: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            held: None,
            min_part_size,
        }
    }

    /// Append `data`; returns any parts now provably safe to upload (i.e.
    /// superseded by a later full chunk, so no longer a candidate for the
    /// final, size-exempt part).
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(data);
        let mut ready = Vec::new();
        while self.pending.len() >= self.min_part_size {
            let chunk = self.pending.split_to(self.min_part_size).freeze();
            if let Some(superseded) = self.held.replace(chunk) {
                ready.push(superseded);
            }
        }
        ready
    }

    /// Drain the held chunk (if any) and the undersized remainder,
    /// concatenated into a single final part regardless of size. Called on
    /// close/commit, since the final part of a multipart upload is exempt
    /// from the minimum-size constraint.
    pub fn drain(&mut self) -> Option<Bytes> {
        let held = self.held.take();
        let tail = if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().freeze())
        };
        match (held, tail) {
            (None, None) => None,
            (Some(h), None) => Some(h),
            (None, Some(t)) => Some(t),
            (Some(h), Some(t)) => {
                let mut combined = BytesMut::with_capacity(h.len() + t.len());
                combined.extend_from_slice(&h);
                combined.extend_from_slice(&t);
                Some(combined.freeze())
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.held.as_ref().map_or(0, |h| h.len())
    }
}

/// Block buffering for append-only backends (WebHDFS): bytes accumulate
/// until a block boundary, then flush as a single append call.
#[derive(Debug, Default)]
pub struct AppendBuffer {
    pending: BytesMut,
    block_size: usize,
}

impl AppendBuffer {
    pub fn new(block_size: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            block_size,
        }
    }

    /// Append `data`; returns a block to flush once the buffer has grown
    /// past `block_size`, otherwise `None`.
    pub fn push(&mut self, data: &[u8]) -> Option<Bytes> {
        self.pending.extend_from_slice(data);
        if self.pending.len() >= self.block_size {
            Some(self.pending.split().freeze())
        } else {
            None
        }
    }

    pub fn drain(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().freeze())
        }
    }
}

/// One part of a multipart upload, tracked by the S3-family writer so it
/// can build the final `CompleteMultipartUpload` part list.
#[derive(Clone, Debug)]
pub struct Part {
    pub part_number: i32,
    pub etag: Option<String>,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_buffer_withholds_a_full_chunk_as_the_candidate_final_part() {
        let mut buf = PartBuffer::new(4);
        let ready = buf.push(b"abcd");
        assert!(ready.is_empty());
        assert_eq!(buf.pending_len(), 4);
    }

    #[test]
    fn part_buffer_releases_the_held_chunk_once_a_later_one_fills() {
        let mut buf = PartBuffer::new(4);
        buf.push(b"abcd");
        let ready = buf.push(b"efgh");
        assert_eq!(ready, vec![Bytes::from_static(b"abcd")]);
        assert_eq!(buf.pending_len(), 4);
    }

    #[test]
    fn part_buffer_drain_flushes_held_chunk_and_remainder_together() {
        let mut buf = PartBuffer::new(4);
        buf.push(b"abcd");
        buf.push(b"ef");
        assert_eq!(buf.drain(), Some(Bytes::from_static(b"abcdef")));
        assert_eq!(buf.drain(), None);
    }

    #[test]
    fn part_buffer_drain_with_no_held_chunk_flushes_remainder_only() {
        let mut buf = PartBuffer::new(4);
        buf.push(b"ab");
        assert_eq!(buf.drain(), Some(Bytes::from_static(b"ab")));
        assert_eq!(buf.drain(), None);
    }

    #[test]
    fn append_buffer_flushes_at_block_size() {
        let mut buf = AppendBuffer::new(3);
        assert_eq!(buf.push(b"a"), None);
        assert_eq!(buf.push(b"bc"), Some(Bytes::from_static(b"abc")));
    }

    #[test]
    fn require_state_rejects_terminal_states() {
        assert!(require_state(WriterState::Open, &[WriterState::Open]).is_ok());
        let err = require_state(WriterState::Committed, &[WriterState::Open]).unwrap_err();
        assert_eq!(err.code(), "WRITER_CLOSED");
    }
}
