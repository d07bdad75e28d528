//! Render loop driving the interface server.
//!
//! [`TestRenderer`] produces the frames; [`RenderService`] owns the
//! [`InterfaceServer`], feeds it one frame per tick along with progress and
//! sample-rate telemetry, and applies whatever state the client changed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use preview_core::{HdrImage, InterfaceServer, PreviewError, SessionState};

use crate::config::RenderServerConfig;

/// Ready-flag polling slice while waiting for a client.
const READY_POLL: Duration = Duration::from_millis(100);

// ── TestRenderer ─────────────────────────────────────────────────

/// Scrolling-gradient frame generator.
pub struct TestRenderer {
    width: u32,
    height: u32,
    offset: u32,
    gain: f32,
    playing: bool,
    rgb: Vec<u8>,
}

impl TestRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            offset: 0,
            gain: 1.0,
            playing: true,
            rgb: vec![0; width as usize * height as usize * 3],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Pick up the controls that affect the generated image.
    pub fn apply(&mut self, state: &SessionState) {
        self.gain = 2f32.powf(state.exposure);
        self.playing = state.is_playing;
    }

    /// Render the next frame as tightly packed RGB24.
    pub fn render(&mut self) -> &[u8] {
        let (w, h) = (self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let shifted = (x + self.offset) % w;
                let i = (y as usize * w as usize + x as usize) * 3;
                self.rgb[i] = self.scale(y % 255);
                self.rgb[i + 1] = self.scale((shifted + y) % 255);
                self.rgb[i + 2] = self.scale(shifted % 255);
            }
        }
        if self.playing && w > 0 {
            self.offset = (self.offset + 1) % w;
        }
        &self.rgb
    }

    /// Linear float ramp at the preview resolution.
    pub fn hdr_image(&self) -> HdrImage {
        let (w, h) = (self.width.max(1), self.height.max(1));
        let mut image = HdrImage::zeroed(w, h);
        for y in 0..h {
            for x in 0..w {
                let i = (y as usize * w as usize + x as usize) * 3;
                let u = x as f32 / w as f32;
                let v = y as f32 / h as f32;
                // Values above 1.0 on purpose: this is radiance, not display.
                image.samples[i] = 4.0 * u;
                image.samples[i + 1] = 4.0 * v;
                image.samples[i + 2] = 4.0 * u * v;
            }
        }
        image
    }

    fn scale(&self, v: u32) -> u8 {
        (v as f32 * self.gain).clamp(0.0, 255.0) as u8
    }
}

// ── RenderService ────────────────────────────────────────────────

/// Why the render loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The client sent `stop`.
    Stopped,
    /// The client sent `detach`.
    Detached,
    /// The link went away.
    Disconnected,
    /// The local stop handle was cleared.
    Interrupted,
}

pub struct RenderService {
    config: RenderServerConfig,
    server: InterfaceServer,
    renderer: TestRenderer,
    running: Arc<AtomicBool>,
}

impl RenderService {
    pub fn new(config: RenderServerConfig) -> Self {
        let server = InterfaceServer::new(config.to_server_config());
        let renderer = TestRenderer::new(config.stream.width, config.stream.height);
        Self {
            config,
            server,
            renderer,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Clearing this flag ends [`serve`](Self::serve) at the next tick.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Start listening. Returns once the server thread is up.
    pub fn start(&mut self) -> Result<(), PreviewError> {
        self.server.start()?;
        for _ in 0..200 {
            if self.server.local_addr().is_some() || !self.server.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        match self.server.local_addr() {
            Some(addr) => {
                info!(%addr, "waiting for a remote UI");
                Ok(())
            }
            None => Err(PreviewError::Other("interface server did not start listening".into())),
        }
    }

    /// Start, then serve one client until it stops, detaches or drops.
    pub fn run(&mut self) -> Result<Outcome, PreviewError> {
        self.start()?;
        self.serve()
    }

    /// Wait for the client and run the render loop.
    pub fn serve(&mut self) -> Result<Outcome, PreviewError> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                self.server.stop();
                return Ok(Outcome::Interrupted);
            }
            if self.server.wait_until_ready(READY_POLL) {
                break;
            }
            if !self.server.is_running() {
                return Err(PreviewError::Other(
                    "interface server exited before a client synchronised".into(),
                ));
            }
        }
        info!(server = %self.server, phase = %self.server.phase(), "remote UI attached");

        let (width, height) = (self.renderer.width(), self.renderer.height());
        self.server.initialise_video_stream(width, height)?;
        if self.config.hdr.send_on_connect {
            let chunks = self.server.send_hdr_image(&self.renderer.hdr_image())?;
            info!(chunks, "sent HDR test image");
        }

        let interval = self.config.frame_interval();
        let total = self.config.stream.total_steps.max(1);
        let mut step = 0;
        let outcome = loop {
            if !self.running.load(Ordering::SeqCst) {
                break Outcome::Interrupted;
            }
            if let Some(outcome) = self.poll_state() {
                break outcome;
            }
            if !self.server.is_ready() {
                info!("remote UI disconnected");
                break Outcome::Disconnected;
            }
            if let Err(e) = self.render_tick(step, total) {
                if !self.server.is_ready() {
                    info!("remote UI disconnected");
                    break Outcome::Disconnected;
                }
                self.server.stop();
                return Err(e);
            }
            step = (step + 1) % total;
            thread::sleep(interval);
        };

        info!(?outcome, "stopping interface server");
        self.server.stop();
        Ok(outcome)
    }

    fn poll_state(&mut self) -> Option<Outcome> {
        if !self.server.state_changed() {
            return None;
        }
        let state = self.server.consume_state();
        info!(%state, "state updated");
        if !state.model_path.is_empty() {
            info!(path = %state.model_path, "model load requested");
        }
        self.renderer.apply(&state);
        if state.detach {
            info!("client requested detach");
            return Some(Outcome::Detached);
        }
        if state.stop {
            info!("client requested stop");
            return Some(Outcome::Stopped);
        }
        None
    }

    fn render_tick(&mut self, step: u32, total: u32) -> Result<(), PreviewError> {
        let (width, height) = (self.renderer.width(), self.renderer.height());
        let frame = self.renderer.render();
        self.server.send_preview_frame(frame, width, height)?;
        self.server.update_progress(step, total)?;
        // Fake throughput, scaled by the requested samples per pixel.
        let samples = self.server.state().interactive_samples.max(1) as f32;
        self.server.update_sample_rate(1000.0 * samples, 50_000.0 * samples)?;
        debug!(step, offset = self.renderer.offset(), "frame sent");
        Ok(())
    }
}

impl Drop for RenderService {
    fn drop(&mut self) {
        if self.server.is_running() {
            warn!("render service dropped while serving");
        }
        self.server.stop();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use preview_core::{ChannelSet, Connection, ConnectionInfo, RemoteControl, sync_with_peer};

    fn local_config() -> RenderServerConfig {
        let mut config = RenderServerConfig::default();
        config.network.bind_address = "127.0.0.1".into();
        config.network.port = 0;
        config.network.handshake_timeout_secs = 5;
        config.stream.width = 16;
        config.stream.height = 8;
        config.stream.fps = 100;
        config.hdr.chunk_len = 100;
        config
    }

    #[test]
    fn gradient_scrolls_while_playing() {
        let mut renderer = TestRenderer::new(4, 2);
        let first = renderer.render().to_vec();
        assert_eq!(first.len(), 4 * 2 * 3);
        // Pixel (1, 1): red = y, green = x + y, blue = x.
        assert_eq!(&first[15..18], &[1, 2, 1]);
        let second = renderer.render().to_vec();
        assert_ne!(first, second);
        assert_eq!(renderer.offset(), 2);
    }

    #[test]
    fn paused_renderer_holds_frame() {
        let mut renderer = TestRenderer::new(4, 2);
        renderer.apply(&SessionState {
            is_playing: false,
            ..SessionState::default()
        });
        let first = renderer.render().to_vec();
        assert_eq!(first, renderer.render().to_vec());
    }

    #[test]
    fn exposure_scales_brightness() {
        let mut renderer = TestRenderer::new(4, 4);
        renderer.apply(&SessionState {
            exposure: 1.0,
            is_playing: false,
            ..SessionState::default()
        });
        let frame = renderer.render();
        // Pixel (0, 3): red = 3, doubled.
        assert_eq!(frame[3 * 4 * 3], 6);
    }

    #[test]
    fn hdr_image_matches_preview_size() {
        let renderer = TestRenderer::new(8, 4);
        let image = renderer.hdr_image();
        assert_eq!((image.width, image.height), (8, 4));
        assert_eq!(image.pixel(4, 2).unwrap(), [2.0, 2.0, 1.0]);
    }

    #[test]
    fn stop_request_ends_service() {
        let mut service = RenderService::new(local_config());
        service.start().unwrap();
        let addr = service.local_addr().unwrap();
        let serving = thread::spawn(move || service.serve());

        let rt = tokio::runtime::Runtime::new().unwrap();
        let info = ConnectionInfo::new(addr.ip().to_string(), addr.port());
        let conn = rt
            .block_on(Connection::connect(&info, Arc::new(ChannelSet::default_set())))
            .unwrap();
        rt.block_on(sync_with_peer(conn.muxer(), conn.demuxer(), Duration::from_secs(5)))
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        RemoteControl::new(conn.muxer().clone()).request_stop().unwrap();
        assert_eq!(serving.join().unwrap().unwrap(), Outcome::Stopped);
    }

    #[test]
    fn interrupt_before_client() {
        let mut service = RenderService::new(local_config());
        service.start().unwrap();
        service.stop_handle().store(false, Ordering::SeqCst);
        assert_eq!(service.serve().unwrap(), Outcome::Interrupted);
    }
}
