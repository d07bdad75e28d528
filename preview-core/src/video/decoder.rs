use std::io::{self, Read};

use tracing::{debug, trace, warn};

use crate::error::PreviewError;
use crate::video::{RGB_BYTES_PER_PIXEL, StreamHeader, VideoDecoder};

/// Pull-based decoder for the preview stream.
///
/// An I/O failure on the source is sticky: after the first one,
/// [`next_frame`](VideoDecoder::next_frame) returns `false` without
/// touching the source again.
pub struct PreviewDecoder<R> {
    reader: R,
    header: StreamHeader,
    frame_len: usize,
    compressed: Vec<u8>,
    frame: Vec<u8>,
    io_failed: bool,
}

impl<R: Read> PreviewDecoder<R> {
    /// Read the stream header. Blocks until it arrives or the source fails.
    pub fn open(mut reader: R) -> Result<Self, PreviewError> {
        let header = StreamHeader::read_from(&mut reader)?;
        let frame_len = header.frame_len().ok_or_else(|| {
            PreviewError::StreamInit(format!("frame size {}x{} too large", header.width, header.height))
        })?;
        debug!(width = header.width, height = header.height, fps = header.fps, "video stream opened");
        Ok(Self {
            reader,
            header,
            frame_len,
            compressed: Vec::new(),
            frame: vec![0; frame_len],
            io_failed: false,
        })
    }

    pub fn header(&self) -> StreamHeader {
        self.header
    }

    /// Largest compressed frame accepted before the stream is treated as
    /// corrupt.
    fn compressed_limit(&self) -> usize {
        let raw = self.frame_len;
        raw + raw / 16 + 4096
    }

    fn fail(&mut self, e: io::Error) {
        if !self.io_failed {
            warn!(error = %e, "video source failed");
        }
        self.io_failed = true;
    }

    fn read_frame(&mut self) -> Result<bool, io::Error> {
        let mut len = [0u8; 4];
        self.reader.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        if len > self.compressed_limit() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("compressed frame of {len} bytes exceeds limit"),
            ));
        }
        self.compressed.resize(len, 0);
        self.reader.read_exact(&mut self.compressed)?;

        let decoded = match zstd::decode_all(self.compressed.as_slice()) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return Ok(false);
            }
        };
        if decoded.len() != self.frame_len {
            warn!(got = decoded.len(), expected = self.frame_len, "dropping frame of wrong size");
            return Ok(false);
        }
        self.frame = decoded;
        trace!(compressed = len, "frame decoded");
        Ok(true)
    }

    fn check_destination(&self, dst: &[u8], stride: usize, bpp: usize) -> Result<(), PreviewError> {
        let row = self.header.width as usize * bpp;
        let rows = self.header.height as usize;
        if stride < row {
            return Err(PreviewError::InvalidFrame(format!("stride {stride} below row size {row}")));
        }
        let needed = stride * (rows - 1) + row;
        if dst.len() < needed {
            return Err(PreviewError::InvalidFrame(format!(
                "destination holds {} bytes, frame needs {needed}",
                dst.len()
            )));
        }
        Ok(())
    }
}

impl<R: Read + Send> VideoDecoder for PreviewDecoder<R> {
    fn next_frame(&mut self) -> bool {
        if self.io_failed {
            return false;
        }
        match self.read_frame() {
            Ok(decoded) => decoded,
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn frame_width(&self) -> u32 {
        self.header.width
    }

    fn frame_height(&self) -> u32 {
        self.header.height
    }

    fn io_error(&self) -> bool {
        self.io_failed
    }

    fn extract_rgb(&self, dst: &mut [u8], stride: usize) -> Result<(), PreviewError> {
        self.check_destination(dst, stride, RGB_BYTES_PER_PIXEL)?;
        let row = self.header.width as usize * RGB_BYTES_PER_PIXEL;
        for (y, src) in self.frame.chunks_exact(row).enumerate() {
            dst[y * stride..y * stride + row].copy_from_slice(src);
        }
        Ok(())
    }

    fn extract_rgba(&self, dst: &mut [u8], stride: usize) -> Result<(), PreviewError> {
        self.check_destination(dst, stride, 4)?;
        let row = self.header.width as usize * RGB_BYTES_PER_PIXEL;
        for (y, src) in self.frame.chunks_exact(row).enumerate() {
            let out = &mut dst[y * stride..y * stride + self.header.width as usize * 4];
            for (px, rgb) in out.chunks_exact_mut(4).zip(src.chunks_exact(RGB_BYTES_PER_PIXEL)) {
                px[..3].copy_from_slice(rgb);
                px[3] = 255;
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
