//! Domain-specific error types for the preview link.
//!
//! Every fallible operation in the crate returns `Result<T, PreviewError>`.
//! Malformed wire input surfaces as a typed error, never a panic.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the preview link.
#[derive(Debug, Error)]
pub enum PreviewError {
    // ── Framing Errors ───────────────────────────────────────────
    /// Received bytes that do not start with the `PVW0` magic sequence.
    #[error("invalid magic bytes: expected PVW0")]
    InvalidMagic,

    /// A field in the frame header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The payload failed checksum verification.
    #[error("checksum mismatch on channel {channel}")]
    ChecksumMismatch { channel: u32 },

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Channel Errors ───────────────────────────────────────────
    /// A channel name is not part of the agreed channel set.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The peer was built against a different channel set.
    #[error("channel set version mismatch: local {local}, remote {remote}")]
    VersionMismatch { local: u32, remote: u32 },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The outbound queue or the link was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A lifecycle transition was attempted from the wrong phase.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Stream Errors ────────────────────────────────────────────
    /// The video stream could not be opened or produced no frame.
    #[error("video stream initialisation failed: {0}")]
    StreamInit(String),

    /// The frame buffer was configured with a channel count other than 3 or 4.
    #[error("unsupported number of pixel channels: {0}")]
    UnsupportedChannels(usize),

    /// A decoded frame or destination buffer has the wrong shape.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A bulk transfer header or chunk was malformed.
    #[error("bulk transfer error: {0}")]
    Bulk(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for PreviewError {
    fn from(s: String) -> Self {
        PreviewError::Other(s)
    }
}

impl From<&str> for PreviewError {
    fn from(s: &str) -> Self {
        PreviewError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PreviewError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PreviewError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for PreviewError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        PreviewError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = PreviewError::InvalidMagic;
        assert!(e.to_string().contains("magic"));

        let e = PreviewError::FrameTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = PreviewError::UnsupportedChannels(2);
        assert!(e.to_string().contains('2'));
    }

    #[test]
    fn from_string() {
        let e: PreviewError = "something broke".into();
        assert!(matches!(e, PreviewError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: PreviewError = io_err.into();
        assert!(matches!(e, PreviewError::Connection(_)));
    }

    #[test]
    fn from_closed_sender() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
        drop(rx);
        let e: PreviewError = tx.send(1).unwrap_err().into();
        assert!(matches!(e, PreviewError::ChannelClosed));
    }
}
