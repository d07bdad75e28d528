//! `tokio_util` codec turning a byte stream into [`Packet`]s.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::PreviewError;
use crate::header::{FrameHeader, HEADER_SIZE, payload_checksum};
use crate::packet::{MAX_PAYLOAD_SIZE, Packet};

#[derive(Debug, Default, Clone, Copy)]
pub struct MuxCodec;

impl Decoder for MuxCodec {
    type Item = Packet;
    type Error = PreviewError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::from_bytes(&src[..HEADER_SIZE])?;
        let len = header.payload_length();
        if len > MAX_PAYLOAD_SIZE as u64 {
            return Err(PreviewError::FrameTooLarge {
                size: len as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let len = len as usize;

        if src.len() < HEADER_SIZE + len {
            src.reserve(HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(len).freeze();
        if payload_checksum(&payload) != header.checksum() {
            return Err(PreviewError::ChecksumMismatch {
                channel: header.channel(),
            });
        }

        trace!(channel = header.channel(), len, "frame decoded");
        Packet::new(header.channel(), payload).map(Some)
    }
}

impl Encoder<Packet> for MuxCodec {
    type Error = PreviewError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = item.header();
        dst.reserve(HEADER_SIZE + item.len());
        dst.put_slice(&header.to_bytes());
        dst.put_slice(item.payload());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
