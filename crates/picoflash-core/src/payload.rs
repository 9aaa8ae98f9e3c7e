//! Firmware payload handling.
//!
//! Holds the image bytes with their SHA-256 digest and tracks chunked
//! sending for the OTA write loop.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::container::file::read_raw_file;
use crate::error::InputError;

/// Default OTA chunk size (base64 encodes to ~1.4 KB per request).
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Firmware image with its digest. Immutable once built.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    digest: [u8; 32],
}

impl FirmwareImage {
    /// Wrap raw bytes. Empty buffers are allowed here; the device decides.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(&data));
        Self { data, digest }
    }

    /// Load from disk. Empty or unreadable files are rejected.
    pub fn load(path: &Path) -> Result<Self, InputError> {
        Ok(Self::from_bytes(read_raw_file(path)?))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Lowercase hex SHA-256, as the device expects it.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Chunk tracking state for stateful sending.
#[derive(Debug, Default, Clone)]
pub struct ChunkState {
    /// Chunks sent so far.
    pub current: usize,
    /// Total number of chunks.
    pub total: usize,
    /// Current byte offset.
    pub offset: usize,
    pub chunk_size: usize,
    pub data_size: usize,
}

impl ChunkState {
    pub fn new(data_size: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            current: 0,
            total: data_size.div_ceil(chunk_size),
            offset: 0,
            chunk_size,
            data_size,
        }
    }

    /// Next chunk without advancing.
    pub fn peek<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        let end = self.data_size.min(data.len());
        if self.offset >= end {
            return None;
        }
        let len = (end - self.offset).min(self.chunk_size);
        Some(&data[self.offset..self.offset + len])
    }

    /// Mark `len` bytes as sent.
    pub fn advance(&mut self, len: usize) {
        self.offset += len;
        self.current += 1;
    }

    pub fn is_done(&self) -> bool {
        self.offset >= self.data_size
    }

    pub fn progress_pct(&self) -> u8 {
        if self.data_size == 0 {
            100
        } else {
            ((self.offset * 100) / self.data_size) as u8
        }
    }
}
