//! Fixed-size header preceding every multiplexed frame on the wire.
//!
//! ```text
//! magic:          [u8; 4]  "PVW0"
//! channel:        u32      index into the agreed ChannelSet
//! checksum:       u32      first 4 bytes of blake3(payload), 0 if empty
//! payload_length: u64
//! ```
//!
//! All integers are little-endian.

use crate::error::PreviewError;

pub const MAGIC: [u8; 4] = *b"PVW0";
pub const HEADER_SIZE: usize = 20;

pub type FrameHeaderBytes = [u8; HEADER_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    channel: u32,
    checksum: u32,
    payload_length: u64,
}

impl FrameHeader {
    pub fn new(channel: u32, checksum: u32, payload_length: u64) -> Self {
        Self {
            channel,
            checksum,
            payload_length,
        }
    }

    /// Build the header for `payload`, computing its checksum.
    pub fn for_payload(channel: u32, payload: &[u8]) -> Self {
        Self::new(channel, payload_checksum(payload), payload.len() as u64)
    }

    pub fn to_bytes(&self) -> FrameHeaderBytes {
        let mut buf: FrameHeaderBytes = [0; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.channel.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12..20].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreviewError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PreviewError::InvalidHeader("header shorter than 20 bytes"));
        }
        if bytes[0..4] != MAGIC {
            return Err(PreviewError::InvalidMagic);
        }
        Ok(Self {
            channel: le_u32(&bytes[4..8]),
            checksum: le_u32(&bytes[8..12]),
            payload_length: le_u64(&bytes[12..20]),
        })
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn payload_length(&self) -> u64 {
        self.payload_length
    }
}

/// Truncated blake3 digest used to detect corrupted payloads.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    if payload.is_empty() {
        return 0;
    }
    let digest = blake3::hash(payload);
    le_u32(&digest.as_bytes()[0..4])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
