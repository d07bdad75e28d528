//! # preview-core
//!
//! Remote render preview link: a live compressed video preview, scalar
//! telemetry and a chunked HDR image transfer multiplexed over one
//! connection.
//!
//! This crate contains:
//! - **Framing**: `FrameHeader`, `Packet` and the `MuxCodec` for `tokio_util`
//! - **Network**: `Connection` with `Muxer`/`Demuxer` named channels
//! - **Protocol**: the versioned `ChannelSet` and channel payload types
//! - **State**: ready handshake, `SharedState` with consume semantics,
//!   session bindings and the `SessionPhase` lifecycle
//! - **Video**: the zstd preview stream encoder/decoder
//! - **Preview**: inbox, pull-source adapter, decode loop, frame bridge,
//!   rate estimators and HDR reassembly
//! - **Server**: `InterfaceServer`, the render-side end of the link
//! - **Error**: `PreviewError`, a `thiserror`-based error enum

pub mod codec;
pub mod error;
pub mod header;
pub mod network;
pub mod packet;
pub mod preview;
pub mod protocol;
pub mod server;
pub mod state;
pub mod video;

mod sync;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::MuxCodec;
pub use error::PreviewError;
pub use header::{FrameHeader, HEADER_SIZE};
pub use network::{Connection, ConnectionInfo, Demuxer, Liveness, Muxer, Subscription};
pub use packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet};
pub use protocol::{BulkChunk, BulkHeader, ChannelSet, SampleRates, names};
pub use server::{InterfaceServer, ServerConfig};
pub use state::{RemoteControl, SessionPhase, SessionState, SharedState, StateBindings, sync_with_peer};
pub use video::{PreviewDecoder, PreviewEncoder, VideoDecoder};

pub use preview::{
    BulkReassembler, ChannelInbox, DecodeLoop, DisplaySink, FrameBridge, FrameBuffer, HdrImage,
    HdrSink, PacketSource, PfmWriter, PixelLayout, VideoClient,
};
