//! Streaming hash state. The Upload Session serializes the running hash
//! into `hashstates/<algo>/<N>` after each successful PATCH so that a
//! crash-restart can resume without re-reading staging.
//!
//! [`ocistore_core::digest::Digester`] wraps an opaque `DynDigest` trait
//! object, which is deliberately generic over algorithm but, for exactly
//! that reason, cannot expose its internal compression state for
//! snapshotting. Since `ocistore_core::digest::Algorithm::digester` already
//! refuses every algorithm but `sha256` for new uploads, every live
//! [`crate::UploadSession`] is hashing with sha256 specifically, so this
//! module hand-rolls a sha256 streaming hasher directly on top of
//! `sha2`'s block-compression primitive (`compress256`, the reason
//! `ocistore-core`'s `sha2` dependency carries the `compress` feature) —
//! the same primitive `sha2::Sha256` itself is built on, just with the
//! intermediate state exposed so it can be serialized mid-stream.

use serde::{Deserialize, Serialize};
use sha2::digest::consts::U64;
use sha2::digest::generic_array::GenericArray;

const INITIAL_STATE: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// A sha256 hasher whose state can be snapshotted and restored mid-stream.
#[derive(Clone)]
pub struct StreamingSha256 {
    state: [u32; 8],
    buffer: Vec<u8>,
    total_len: u64,
}

impl Default for StreamingSha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSha256 {
    pub fn new() -> Self {
        Self {
            state: INITIAL_STATE,
            buffer: Vec::with_capacity(64),
            total_len: 0,
        }
    }

    pub fn from_snapshot(snapshot: HashSnapshot) -> Self {
        Self {
            state: snapshot.state,
            buffer: snapshot.buffer,
            total_len: snapshot.total_len,
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.total_len += data.len() as u64;

        if !self.buffer.is_empty() {
            let need = 64 - self.buffer.len();
            let take = need.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() < 64 {
                return;
            }
            let block = std::mem::replace(&mut self.buffer, Vec::with_capacity(64));
            Self::compress(&mut self.state, &block);
        }

        while data.len() >= 64 {
            Self::compress(&mut self.state, &data[..64]);
            data = &data[64..];
        }
        self.buffer.extend_from_slice(data);
    }

    fn compress(state: &mut [u32; 8], block: &[u8]) {
        debug_assert_eq!(block.len(), 64);
        let block = GenericArray::<u8, U64>::clone_from_slice(block);
        sha2::compress256(state, std::slice::from_ref(&block));
    }

    /// Finalize into the 32 raw digest bytes, per the standard sha256
    /// padding scheme (a `0x80` byte, zero padding, then the bit length as
    /// a big-endian `u64`).
    pub fn finalize(self) -> [u8; 32] {
        let mut state = self.state;
        let mut tail = self.buffer;
        let bit_len = self.total_len * 8;

        tail.push(0x80);
        while tail.len() % 64 != 56 {
            tail.push(0);
        }
        tail.extend_from_slice(&bit_len.to_be_bytes());

        for block in tail.chunks(64) {
            Self::compress(&mut state, block);
        }

        let mut out = [0u8; 32];
        for (i, word) in state.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    pub fn snapshot(&self) -> HashSnapshot {
        HashSnapshot {
            state: self.state,
            buffer: self.buffer.clone(),
            total_len: self.total_len,
        }
    }
}

/// The serializable form of a [`StreamingSha256`]'s internal state,
/// persisted to `_uploads/<uuid>/hashstates/sha256/<N>` after every
/// successful PATCH.
#[derive(Clone, Serialize, Deserialize)]
pub struct HashSnapshot {
    state: [u32; 8],
    buffer: Vec<u8>,
    total_len: u64,
}

/// Render 32 raw digest bytes as the lower-case hex `Digest` expects.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_sha256_vector() {
        let mut hasher = StreamingSha256::new();
        hasher.update(b"hello");
        let digest = hasher.finalize();
        assert_eq!(
            hex_encode(&digest),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn matches_across_chunk_boundaries() {
        let mut whole = StreamingSha256::new();
        whole.update(b"abcdefghij");

        let mut split = StreamingSha256::new();
        split.update(b"abcde");
        split.update(b"fghij");

        assert_eq!(whole.finalize(), split.finalize());
    }

    #[test]
    fn snapshot_resumes_identically() {
        let mut hasher = StreamingSha256::new();
        hasher.update(b"abcde");
        let snapshot = hasher.snapshot();

        let mut resumed = StreamingSha256::from_snapshot(snapshot);
        resumed.update(b"fghij");

        let mut whole = StreamingSha256::new();
        whole.update(b"abcdefghij");

        assert_eq!(whole.finalize(), resumed.finalize());
    }

    #[test]
    fn handles_multi_block_input() {
        let data = vec![0x5au8; 200];
        let mut hasher = StreamingSha256::new();
        hasher.update(&data);
        let digest = hasher.finalize();
        // cross-checked against a reference sha256 implementation offline;
        // pinned here so a future change to the block-compression wiring
        // gets caught immediately.
        assert_eq!(
            hex_encode(&digest),
            "d64527abf8bbf8d23129cd790bba661f5cfa61b4a5661b30da2e821653575abb"
        );
    }
}
