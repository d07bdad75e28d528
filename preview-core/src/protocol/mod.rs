//! Payload definitions carried on the preview channels.
//!
//! Values are serialized with `serde` + `bincode` and carried inside
//! [`Packet`] bodies on the channel named by [`channels::names`].
//!
//! [`Packet`]: crate::packet::Packet

pub mod bulk;
pub mod channels;
pub mod telemetry;

pub use bulk::{BulkChunk, BulkHeader, SAMPLES_PER_PIXEL};
pub use channels::{ChannelSet, names};
pub use telemetry::{SampleRates, progress_fraction};
