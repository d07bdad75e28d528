//! Client-side bridging from the multiplexed link to the renderer.
//!
//! - [`inbox`]: per-channel packet FIFO with a blocking wait
//! - [`source`]: `io::Read` adapter the video decoder pulls from
//! - [`client`]: video receiver and its decode thread
//! - [`frame`]: mutex-guarded frame buffer shared with the renderer
//! - [`rate`]: smoothed bandwidth and frame-rate estimators
//! - [`bulk`]: HDR image reassembly and sinks

pub mod bulk;
pub mod client;
pub mod frame;
pub mod inbox;
pub mod rate;
pub mod source;

pub use bulk::{BulkReassembler, BulkState, DisplaySink, HdrImage, HdrSink, PfmWriter, send_hdr_image, write_pfm};
pub use client::{DecodeLoop, PROBE_FRAMES, VideoClient};
pub use frame::{FrameBridge, FrameBuffer, PixelLayout};
pub use inbox::ChannelInbox;
pub use rate::{BandwidthMeter, FrameRateMeter, RateEstimate};
pub use source::{DEFAULT_WAIT_QUANTUM, PacketSource};
