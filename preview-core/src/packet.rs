use std::fmt::Debug;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::PreviewError;
use crate::header::{FrameHeader, HEADER_SIZE};

/// Largest payload a single multiplexed frame may carry.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// One channel-tagged unit of data.
///
/// The payload is reference counted so the transport and any number of
/// inboxes can hold the same bytes without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    channel: u32,
    payload: Bytes,
}

impl Packet {
    pub fn new(channel: u32, payload: impl Into<Bytes>) -> Result<Self, PreviewError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PreviewError::FrameTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { channel, payload })
    }

    /// Serialize `value` with bincode into a new packet.
    pub fn from_value<T: Serialize + ?Sized>(channel: u32, value: &T) -> Result<Self, PreviewError> {
        let bytes = bincode::serialize(value)?;
        Self::new(channel, bytes)
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::for_payload(self.channel, &self.payload)
    }

    pub fn decode_value<T: DeserializeOwned>(&self) -> Result<T, PreviewError> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}

impl Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("channel", &self.channel)
            .field("len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_payload() {
        let p = Packet::from_value(3, &0.25f32).unwrap();
        assert_eq!(p.channel(), 3);
        assert_eq!(p.len(), 4);
        assert_eq!(p.decode_value::<f32>().unwrap(), 0.25);
    }

    #[test]
    fn rejects_oversized_payload() {
        let big = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            Packet::new(0, big),
            Err(PreviewError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn clones_share_payload() {
        let p = Packet::new(1, vec![1, 2, 3]).unwrap();
        let q = p.clone();
        assert_eq!(p.payload().as_ptr(), q.payload().as_ptr());
    }
}
