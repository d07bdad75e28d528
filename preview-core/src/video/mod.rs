//! Preview video stream: zstd-compressed RGB24 frames behind a small
//! stream header.
//!
//! ```text
//! stream header:  "PVS0" | width u32 | height u32 | fps u32
//! per frame:      len u32 | zstd(width * height * 3 bytes, rows top to bottom)
//! ```
//!
//! All integers are little-endian. The encoder writes through any
//! [`std::io::Write`] sink and the decoder pulls through any
//! [`std::io::Read`] source, so the stream can ride on a channel, a file
//! or a test buffer.

pub mod decoder;
pub mod encoder;

use std::io::Read;

use crate::error::PreviewError;

pub use decoder::PreviewDecoder;
pub use encoder::{ChannelWriter, PreviewEncoder};

pub const STREAM_MAGIC: [u8; 4] = *b"PVS0";
pub const STREAM_HEADER_SIZE: usize = 16;
pub const RGB_BYTES_PER_PIXEL: usize = 3;
/// Largest width or height accepted from a stream header.
pub const MAX_FRAME_DIMENSION: u32 = 16384;

/// The operations the decode loop needs from a video decoder.
pub trait VideoDecoder: Send {
    /// Decode the next frame. `false` when no frame could be produced.
    fn next_frame(&mut self) -> bool;

    fn frame_width(&self) -> u32;

    fn frame_height(&self) -> u32;

    /// `true` once the underlying source failed (timeout or end of stream).
    fn io_error(&self) -> bool;

    /// Copy the current frame as packed RGB rows `stride` bytes apart.
    fn extract_rgb(&self, dst: &mut [u8], stride: usize) -> Result<(), PreviewError>;

    /// Copy the current frame as RGBA rows with opaque alpha.
    fn extract_rgba(&self, dst: &mut [u8], stride: usize) -> Result<(), PreviewError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamHeader {
    /// Bytes in one decoded RGB frame. `None` when a side exceeds
    /// [`MAX_FRAME_DIMENSION`] or the size does not fit in `usize`.
    pub fn frame_len(&self) -> Option<usize> {
        if self.width > MAX_FRAME_DIMENSION || self.height > MAX_FRAME_DIMENSION {
            return None;
        }
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(RGB_BYTES_PER_PIXEL)
    }

    pub fn to_bytes(&self) -> [u8; STREAM_HEADER_SIZE] {
        let mut buf = [0u8; STREAM_HEADER_SIZE];
        buf[0..4].copy_from_slice(&STREAM_MAGIC);
        buf[4..8].copy_from_slice(&self.width.to_le_bytes());
        buf[8..12].copy_from_slice(&self.height.to_le_bytes());
        buf[12..16].copy_from_slice(&self.fps.to_le_bytes());
        buf
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, PreviewError> {
        let mut buf = [0u8; STREAM_HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|e| PreviewError::StreamInit(format!("no stream header: {e}")))?;
        if buf[0..4] != STREAM_MAGIC {
            return Err(PreviewError::StreamInit("bad stream magic".into()));
        }
        let field = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let header = Self {
            width: field(4),
            height: field(8),
            fps: field(12),
        };
        if header.width == 0 || header.height == 0 {
            return Err(PreviewError::StreamInit(format!(
                "empty frame size {}x{}",
                header.width, header.height
            )));
        }
        if header.frame_len().is_none() {
            return Err(PreviewError::StreamInit(format!(
                "frame size {}x{} exceeds {MAX_FRAME_DIMENSION} per side",
                header.width, header.height
            )));
        }
        Ok(header)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes() {
        let h = StreamHeader {
            width: 640,
            height: 480,
            fps: 30,
        };
        let bytes = h.to_bytes();
        assert_eq!(&bytes[..4], b"PVS0");
        assert_eq!(StreamHeader::read_from(&mut &bytes[..]).unwrap(), h);
        assert_eq!(h.frame_len(), Some(640 * 480 * 3));
    }

    #[test]
    fn rejects_garbage_and_empty_size() {
        let mut junk: &[u8] = b"MP4\0aaaaaaaaaaaa";
        assert!(matches!(
            StreamHeader::read_from(&mut junk),
            Err(PreviewError::StreamInit(_))
        ));

        let empty = StreamHeader {
            width: 0,
            height: 10,
            fps: 1,
        }
        .to_bytes();
        assert!(StreamHeader::read_from(&mut &empty[..]).is_err());
    }

    #[test]
    fn oversized_frame_is_refused() {
        let huge = StreamHeader {
            width: u32::MAX,
            height: u32::MAX,
            fps: 30,
        };
        assert_eq!(huge.frame_len(), None);
        assert!(matches!(
            StreamHeader::read_from(&mut &huge.to_bytes()[..]),
            Err(PreviewError::StreamInit(_))
        ));

        let wide = StreamHeader {
            width: MAX_FRAME_DIMENSION + 1,
            height: 1,
            fps: 30,
        };
        assert_eq!(wide.frame_len(), None);

        let largest = StreamHeader {
            width: MAX_FRAME_DIMENSION,
            height: MAX_FRAME_DIMENSION,
            fps: 30,
        };
        assert!(largest.frame_len().is_some());
    }
}
