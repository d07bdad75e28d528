//! Render-side interface server.
//!
//! Runs the link on its own thread with a single-threaded tokio runtime:
//! bind, accept one client, install the session bindings, exchange ready
//! markers, then idle until stopped or the client goes away. The render
//! loop talks to it through the outbound methods and polls
//! [`InterfaceServer::state_changed`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PreviewError;
use crate::network::{Connection, Muxer};
use crate::preview::bulk::{HdrImage, send_hdr_image};
use crate::protocol::channels::{ChannelSet, names};
use crate::protocol::telemetry::{SampleRates, progress_fraction};
use crate::state::connection::SessionPhase;
use crate::state::handshake::sync_with_peer;
use crate::state::session::{SessionState, session_bindings};
use crate::state::shared::SharedState;
use crate::sync::lock;
use crate::video::{ChannelWriter, PreviewEncoder, RGB_BYTES_PER_PIXEL};

pub const DEFAULT_PORT: u16 = 4242;
/// Ready-flag and stop-token polling period.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// `0` picks a free port; see [`InterfaceServer::local_addr`].
    pub port: u16,
    pub handshake_timeout: Duration,
    pub video_fps: u32,
    pub compression_level: i32,
    /// Float samples per HDR chunk.
    pub hdr_chunk_len: usize,
    pub channels: Arc<ChannelSet>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            handshake_timeout: Duration::from_secs(30),
            video_fps: 30,
            compression_level: 1,
            hdr_chunk_len: 64 * 1024,
            channels: Arc::new(ChannelSet::default_set()),
        }
    }
}

/// State shared between the server handle and its thread.
#[derive(Default)]
struct Link {
    ready: AtomicBool,
    phase: Mutex<SessionPhase>,
    local_addr: Mutex<Option<SocketAddr>>,
    muxer: Mutex<Option<Muxer>>,
    video: Mutex<Option<PreviewEncoder<ChannelWriter>>>,
}

impl Link {
    fn set_phase(&self, phase: SessionPhase) {
        debug!(%phase, "session phase");
        *lock(&self.phase) = phase;
    }

    fn advance(&self, step: impl FnOnce(&mut SessionPhase) -> Result<(), PreviewError>) {
        let mut phase = lock(&self.phase);
        match step(&mut phase) {
            Ok(()) => debug!(phase = %*phase, "session phase"),
            Err(e) => warn!(phase = %*phase, error = %e, "unexpected session transition"),
        }
    }
}

pub struct InterfaceServer {
    config: ServerConfig,
    state: Arc<SharedState<SessionState>>,
    link: Arc<Link>,
    cancel: CancellationToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl InterfaceServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(SharedState::new(SessionState::default())),
            link: Arc::new(Link::default()),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// Launch the communication thread. Returns immediately.
    pub fn start(&mut self) -> Result<(), PreviewError> {
        if self.handle.is_some() {
            return Err(PreviewError::ProtocolViolation("interface server already started"));
        }
        self.cancel = CancellationToken::new();
        self.link.ready.store(false, Ordering::Release);

        let config = self.config.clone();
        let state = Arc::clone(&self.state);
        let link = Arc::clone(&self.link);
        let cancel = self.cancel.clone();
        let handle = thread::Builder::new()
            .name("interface-server".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(error = %e, "could not build interface server runtime");
                        return;
                    }
                };
                if let Err(e) = runtime.block_on(communicate(&config, &state, &link, &cancel)) {
                    error!(error = %e, "interface server failed");
                }
                link.ready.store(false, Ordering::Release);
                *lock(&link.muxer) = None;
                *lock(&link.video) = None;
                link.set_phase(SessionPhase::Stopped);
            })
            .map_err(|e| PreviewError::Other(format!("cannot spawn interface server thread: {e}")))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Block until the client is connected and synchronised.
    ///
    /// A zero `timeout` waits indefinitely (or until the server thread
    /// exits). Otherwise the ready flag is polled every 5 ms for at most
    /// `timeout`.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            while !self.is_ready() {
                if !self.is_running() {
                    return false;
                }
                thread::sleep(POLL_INTERVAL);
            }
            return true;
        }
        let attempts = (timeout.as_millis() / POLL_INTERVAL.as_millis()).max(1);
        for _ in 0..attempts {
            if self.is_ready() {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        self.is_ready()
    }

    /// Cancel the communication thread and join it.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => debug!("interface server thread joined"),
                Err(_) => error!("interface server thread could not be joined"),
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.link.ready.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.link.phase).clone()
    }

    /// Bound address, once the listener is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.link.local_addr)
    }

    // ── State ────────────────────────────────────────────────────

    /// Copy the state and clear the changed flag. A pending model load
    /// request is handed out once.
    pub fn consume_state(&self) -> SessionState {
        self.state.consume_state_with(|s| s.model_path.clear())
    }

    pub fn state_changed(&self) -> bool {
        self.state.state_changed()
    }

    pub fn state(&self) -> SessionState {
        self.state.snapshot()
    }

    // ── Outbound ─────────────────────────────────────────────────

    fn muxer(&self) -> Result<Muxer, PreviewError> {
        lock(&self.link.muxer)
            .clone()
            .ok_or(PreviewError::ProtocolViolation("no client connected"))
    }

    pub fn update_progress(&self, step: u32, total: u32) -> Result<(), PreviewError> {
        self.muxer()?.send(names::PROGRESS, &progress_fraction(step, total))
    }

    pub fn update_sample_rate(&self, path_rate: f32, ray_rate: f32) -> Result<(), PreviewError> {
        self.muxer()?
            .send(names::SAMPLE_RATE, &SampleRates::new(path_rate, ray_rate))
    }

    /// Start the preview stream at the given frame size.
    pub fn initialise_video_stream(&self, width: u32, height: u32) -> Result<(), PreviewError> {
        let writer = ChannelWriter::new(self.muxer()?, names::RENDER_PREVIEW);
        let mut encoder = PreviewEncoder::with_compression_level(writer, self.config.compression_level);
        encoder.add_video_stream(width, height, self.config.video_fps)?;
        *lock(&self.link.video) = Some(encoder);
        Ok(())
    }

    /// Encode and send one tightly packed RGB24 frame.
    pub fn send_preview_frame(&self, rgb: &[u8], width: u32, height: u32) -> Result<(), PreviewError> {
        let mut video = lock(&self.link.video);
        let encoder = video
            .as_mut()
            .ok_or(PreviewError::ProtocolViolation("video stream not initialised"))?;
        match encoder.header() {
            Some(h) if h.width == width && h.height == height => {}
            _ => {
                return Err(PreviewError::InvalidFrame(format!(
                    "frame {width}x{height} does not match the video stream"
                )));
            }
        }
        encoder.put_video_frame(rgb, width as usize * RGB_BYTES_PER_PIXEL)
    }

    pub fn send_hdr_image(&self, image: &HdrImage) -> Result<u32, PreviewError> {
        send_hdr_image(&self.muxer()?, image, self.config.hdr_chunk_len)
    }
}

impl Drop for InterfaceServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Display for InterfaceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InterfaceServer(port={}, ready={})",
            self.local_addr().map_or(self.config.port, |a| a.port()),
            self.is_ready()
        )
    }
}

async fn communicate(
    config: &ServerConfig,
    state: &Arc<SharedState<SessionState>>,
    link: &Link,
    cancel: &CancellationToken,
) -> Result<(), PreviewError> {
    link.set_phase(SessionPhase::Waiting { peer: None });
    let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
    let local = listener.local_addr()?;
    *lock(&link.local_addr) = Some(local);
    info!(addr = %local, "interface server accepting connections");

    let (stream, peer) = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("stopped before a client connected");
            return Ok(());
        }
        accepted = listener.accept() => accepted?,
    };
    stream.set_nodelay(true)?;
    info!(%peer, "interface client connected");
    link.advance(|p| p.accept(peer));

    let conn = Connection::new(stream, Arc::clone(&config.channels));
    let _bindings = session_bindings().install(conn.demuxer(), state)?;

    let version = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        synced = sync_with_peer(conn.muxer(), conn.demuxer(), config.handshake_timeout) => synced?,
    };

    *lock(&link.muxer) = Some(conn.muxer().clone());
    link.advance(|p| p.synced(version));
    link.ready.store(true, Ordering::Release);
    info!("interface server entering Tx/Rx loop");

    let mut tick = tokio::time::interval(POLL_INTERVAL);
    while !cancel.is_cancelled() && conn.ok() {
        tick.tick().await;
    }
    if !conn.ok() {
        info!("interface client disconnected");
    }
    info!("interface server Tx/Rx loop exited");
    Ok(())
}
