use std::io::{self, Write};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::PreviewError;
use crate::network::mux::Muxer;
use crate::video::{MAX_FRAME_DIMENSION, RGB_BYTES_PER_PIXEL, StreamHeader};

/// Fastest zstd level; preview latency matters more than ratio.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 1;

/// Writes the preview stream into any byte sink.
pub struct PreviewEncoder<W: Write> {
    writer: W,
    header: Option<StreamHeader>,
    compression_level: i32,
    packed: Vec<u8>,
    frames: u64,
}

impl<W: Write> PreviewEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self::with_compression_level(writer, DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn with_compression_level(writer: W, compression_level: i32) -> Self {
        Self {
            writer,
            header: None,
            compression_level,
            packed: Vec::new(),
            frames: 0,
        }
    }

    /// Write the stream header. Only one video stream per encoder.
    pub fn add_video_stream(&mut self, width: u32, height: u32, fps: u32) -> Result<(), PreviewError> {
        if self.header.is_some() {
            return Err(PreviewError::ProtocolViolation("video stream already added"));
        }
        if width == 0 || height == 0 {
            return Err(PreviewError::InvalidFrame(format!("empty frame size {width}x{height}")));
        }
        let header = StreamHeader { width, height, fps };
        if header.frame_len().is_none() {
            return Err(PreviewError::InvalidFrame(format!(
                "frame size {width}x{height} exceeds {MAX_FRAME_DIMENSION} per side"
            )));
        }
        self.writer.write_all(&header.to_bytes())?;
        self.writer.flush()?;
        self.header = Some(header);
        debug!(width, height, fps, "video stream added");
        Ok(())
    }

    /// Compress one RGB24 frame whose rows are `stride` bytes apart.
    pub fn put_video_frame(&mut self, rgb: &[u8], stride: usize) -> Result<(), PreviewError> {
        let header = self
            .header
            .ok_or(PreviewError::ProtocolViolation("no video stream added"))?;
        let row = header.width as usize * RGB_BYTES_PER_PIXEL;
        let rows = header.height as usize;
        if stride < row || rgb.len() < stride * (rows - 1) + row {
            return Err(PreviewError::InvalidFrame(format!(
                "{} bytes at stride {stride} do not hold a {}x{} frame",
                rgb.len(),
                header.width,
                header.height
            )));
        }

        self.packed.clear();
        for y in 0..rows {
            self.packed.extend_from_slice(&rgb[y * stride..y * stride + row]);
        }
        let compressed = zstd::encode_all(self.packed.as_slice(), self.compression_level)
            .map_err(|e| PreviewError::Other(format!("zstd encode failed: {e}")))?;

        let mut frame = Vec::with_capacity(4 + compressed.len());
        frame.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        frame.extend_from_slice(&compressed);
        self.writer.write_all(&frame)?;
        self.writer.flush()?;

        self.frames += 1;
        trace!(frame = self.frames, compressed = compressed.len(), "frame encoded");
        Ok(())
    }

    pub fn header(&self) -> Option<StreamHeader> {
        self.header
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ── ChannelWriter ────────────────────────────────────────────────

/// Largest packet the writer emits; bigger writes are split.
pub const MAX_VIDEO_PACKET: usize = 32 * 1024;

/// [`Write`] adapter that queues every write as packets on one channel.
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    muxer: Muxer,
    channel: String,
    max_packet: usize,
}

impl ChannelWriter {
    pub fn new(muxer: Muxer, channel: impl Into<String>) -> Self {
        Self {
            muxer,
            channel: channel.into(),
            max_packet: MAX_VIDEO_PACKET,
        }
    }

    pub fn with_max_packet(mut self, max_packet: usize) -> Self {
        self.max_packet = max_packet.max(1);
        self
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for chunk in buf.chunks(self.max_packet) {
            self.muxer
                .emplace_packet(&self.channel, Bytes::copy_from_slice(chunk))
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
