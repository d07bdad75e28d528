//! Chunked transfer of an uncompressed float RGB image.
//!
//! # Wire Protocol
//!
//! ```text
//! Server ──[hdr_header]──────────────────────► Client
//!   Payload: BulkHeader (bincode)
//!
//! Server ──[hdr_packet]──────────────────────► Client   (N times, id 0..N)
//!   Payload: BulkChunk (bincode)
//! ```
//!
//! The client treats the chunk with `id == N - 1` as the end of the
//! transfer.

use serde::{Deserialize, Serialize};

use crate::error::PreviewError;

/// Float samples per pixel.
pub const SAMPLES_PER_PIXEL: usize = 3;

/// Largest image accepted from a header, in float samples (256 MiB).
pub const MAX_BULK_SAMPLES: usize = 64 * 1024 * 1024;

/// Announces a new image transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkHeader {
    pub width: i32,
    pub height: i32,
    pub chunk_count: u32,
}

impl BulkHeader {
    pub fn new(width: i32, height: i32, chunk_count: u32) -> Self {
        Self {
            width,
            height,
            chunk_count,
        }
    }

    /// Number of float samples the complete image holds, at most
    /// [`MAX_BULK_SAMPLES`].
    pub fn sample_count(&self) -> Result<usize, PreviewError> {
        if self.width < 0 || self.height < 0 {
            return Err(PreviewError::Bulk(format!(
                "negative image size {}x{}",
                self.width, self.height
            )));
        }
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|px| px.checked_mul(SAMPLES_PER_PIXEL))
            .filter(|&n| n <= MAX_BULK_SAMPLES)
            .ok_or_else(|| {
                PreviewError::Bulk(format!(
                    "image size {}x{} exceeds {MAX_BULK_SAMPLES} samples",
                    self.width, self.height
                ))
            })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PreviewError> {
        bincode::serialize(self).map_err(|e| PreviewError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreviewError> {
        bincode::deserialize(bytes).map_err(|e| PreviewError::Encoding(e.to_string()))
    }
}

/// One numbered slice of the image samples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkChunk {
    pub id: u32,
    pub data: Vec<f32>,
}

impl BulkChunk {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PreviewError> {
        bincode::serialize(self).map_err(|e| PreviewError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreviewError> {
        bincode::deserialize(bytes).map_err(|e| PreviewError::Encoding(e.to_string()))
    }
}

// ── Tests ────────────────────────────────────────────────────────
