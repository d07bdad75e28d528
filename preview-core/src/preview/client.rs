//! Client-side video receiver and its decode thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::PreviewError;
use crate::network::mux::{Demuxer, Liveness, Subscription};
use crate::preview::frame::{FrameBridge, FrameBuffer, PixelLayout};
use crate::preview::inbox::ChannelInbox;
use crate::preview::rate::{BandwidthMeter, FrameRateMeter};
use crate::preview::source::{DEFAULT_WAIT_QUANTUM, PacketSource};
use crate::video::{PreviewDecoder, VideoDecoder};

/// Frames decoded while initialising to prove the stream is usable.
pub const PROBE_FRAMES: usize = 2;

/// Pause between attempts once the stream has failed.
const FAILED_STREAM_BACKOFF: Duration = Duration::from_millis(10);

/// Receives the compressed video channel and owns the decoder.
pub struct VideoClient {
    inbox: Arc<ChannelInbox>,
    bytes_received: Arc<AtomicU64>,
    alive: Liveness,
    /// Ends blocking reads; cancelled when the decode loop stops.
    cancel: CancellationToken,
    wait_quantum: Duration,
    decoder: Option<Box<dyn VideoDecoder>>,
    _subscription: Subscription,
}

impl VideoClient {
    /// Start queueing packets from `channel`. Subscribe before the ready
    /// handshake so no video packet is missed.
    pub fn new(demuxer: &Demuxer, channel: &str) -> Result<Self, PreviewError> {
        let inbox = Arc::new(ChannelInbox::new());
        let bytes_received = Arc::new(AtomicU64::new(0));

        let queue = Arc::clone(&inbox);
        let counter = Arc::clone(&bytes_received);
        let subscription = demuxer.subscribe(channel, move |packet| {
            counter.fetch_add(packet.len() as u64, Ordering::Relaxed);
            queue.push(packet.clone());
        })?;

        Ok(Self {
            inbox,
            bytes_received,
            alive: demuxer.liveness(),
            cancel: CancellationToken::new(),
            wait_quantum: DEFAULT_WAIT_QUANTUM,
            decoder: None,
            _subscription: subscription,
        })
    }

    /// How often a blocked read re-checks cancellation. Applies to
    /// sources created afterwards.
    pub fn with_wait_quantum(mut self, quantum: Duration) -> Self {
        self.wait_quantum = quantum;
        self
    }

    /// A reader over the queued video bytes.
    pub fn packet_source(&self, idle_timeout: Duration) -> PacketSource {
        PacketSource::new(Arc::clone(&self.inbox), self.alive.clone(), idle_timeout)
            .with_wait_quantum(self.wait_quantum)
            .with_cancel(self.cancel.clone())
    }

    /// Open the preview decoder and probe the first frames.
    ///
    /// Blocks until the stream header and [`PROBE_FRAMES`] frames have
    /// arrived, or fails with [`PreviewError::StreamInit`]. `idle_timeout`
    /// applies to every subsequent read as well.
    pub fn initialise_video_stream(&mut self, idle_timeout: Duration) -> Result<(), PreviewError> {
        let decoder = PreviewDecoder::open(self.packet_source(idle_timeout))?;
        self.initialise_with_decoder(Box::new(decoder))
    }

    /// Probe an already-opened decoder and adopt it.
    pub fn initialise_with_decoder(&mut self, mut decoder: Box<dyn VideoDecoder>) -> Result<(), PreviewError> {
        for probe in 0..PROBE_FRAMES {
            if !decoder.next_frame() {
                return Err(PreviewError::StreamInit(format!(
                    "no frame decoded while probing (frame {probe})"
                )));
            }
        }
        info!(
            width = decoder.frame_width(),
            height = decoder.frame_height(),
            "video stream initialised"
        );
        self.decoder = Some(decoder);
        Ok(())
    }

    /// Decode the next frame. `false` without an initialised decoder.
    pub fn receive_video_frame(&mut self) -> bool {
        self.decoder.as_mut().is_some_and(|d| d.next_frame())
    }

    /// Copy the decoded frame into `frame` in its pixel layout.
    pub fn extract_into(&self, frame: &mut FrameBuffer) -> Result<(), PreviewError> {
        let decoder = self
            .decoder
            .as_ref()
            .ok_or(PreviewError::ProtocolViolation("video stream not initialised"))?;
        let stride = frame.stride();
        match frame.layout() {
            PixelLayout::Rgb => decoder.extract_rgb(frame.pixels_mut(), stride),
            PixelLayout::Rgba => decoder.extract_rgba(frame.pixels_mut(), stride),
        }
    }

    /// `false` once the decoder saw a timeout or end of stream.
    pub fn stream_ok(&self) -> bool {
        self.decoder.as_ref().is_some_and(|d| !d.io_error())
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.decoder.as_ref().map(|d| (d.frame_width(), d.frame_height()))
    }

    /// Total compressed video bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn queued_packets(&self) -> usize {
        self.inbox.len()
    }
}

// ── DecodeLoop ───────────────────────────────────────────────────

/// Dedicated thread pulling frames from a [`VideoClient`] into a
/// [`FrameBridge`].
pub struct DecodeLoop {
    bridge: Arc<FrameBridge>,
    stream_ok: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl DecodeLoop {
    /// Validate `channels` (3 or 4), allocate the placeholder frame and
    /// spawn the decode thread.
    pub fn start(client: VideoClient, channels: usize) -> Result<Self, PreviewError> {
        let layout = PixelLayout::try_from(channels)?;
        let (width, height) = client
            .frame_size()
            .ok_or(PreviewError::ProtocolViolation("video stream not initialised"))?;

        let bridge = Arc::new(FrameBridge::new(FrameBuffer::placeholder(width, height, layout)?));
        let stream_ok = Arc::new(AtomicBool::new(client.stream_ok()));
        let cancel = client.cancel.clone();

        let handle = {
            let bridge = Arc::clone(&bridge);
            let stream_ok = Arc::clone(&stream_ok);
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("video-decode".into())
                .spawn(move || decode_frames(client, bridge, stream_ok, cancel))
                .map_err(|e| PreviewError::Other(format!("cannot spawn decode thread: {e}")))?
        };
        debug!(width, height, ?layout, "decode thread started");

        Ok(Self {
            bridge,
            stream_ok,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn bridge(&self) -> Arc<FrameBridge> {
        Arc::clone(&self.bridge)
    }

    pub fn stream_ok(&self) -> bool {
        self.stream_ok.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and join the decode thread. A read blocked on an idle link
    /// notices within one wait quantum. Safe to call more than once.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("video decode thread panicked");
            } else {
                debug!("video decode thread joined");
            }
        }
    }
}

impl Drop for DecodeLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_frames(
    mut client: VideoClient,
    bridge: Arc<FrameBridge>,
    stream_ok: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut bandwidth = BandwidthMeter::new();
    let mut frame_rate = FrameRateMeter::new();
    bandwidth.record(client.bytes_received());

    while !cancel.is_cancelled() {
        if !client.receive_video_frame() {
            let ok = client.stream_ok();
            stream_ok.store(ok, Ordering::Release);
            if !ok {
                thread::sleep(FAILED_STREAM_BACKOFF);
            }
            continue;
        }

        if let Err(e) = bridge.write_frame(|frame| client.extract_into(frame)) {
            warn!(error = %e, "could not extract decoded frame");
            continue;
        }

        let now = Instant::now();
        let mbps = bandwidth.record_at(now, client.bytes_received());
        let fps = frame_rate.record_at(now);
        bridge.set_rates(mbps, fps);
        trace!(mbps, fps, "frame published");
    }
    debug!("decode loop exiting");
}

// ── Tests ────────────────────────────────────────────────────────
