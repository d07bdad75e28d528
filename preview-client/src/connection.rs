//! Connection to the render server.
//!
//! Connects, installs every subscription the remote UI needs, then runs
//! the ready handshake so nothing the server sends after its marker is
//! missed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use preview_core::{
    BulkReassembler, ChannelSet, Connection, DisplaySink, HdrImage, HdrSink, PfmWriter, PreviewError,
    RemoteControl, Subscription, VideoClient, names, sync_with_peer,
};

use crate::config::{ClientConfig, ControlsConfig};
use crate::telemetry::TelemetryMonitor;

/// Writes each image to the display buffer and, if configured, a PFM file.
struct HdrOutput {
    display: DisplaySink,
    file: Option<PfmWriter>,
}

impl HdrSink for HdrOutput {
    fn write_image(&mut self, image: &HdrImage) -> Result<(), PreviewError> {
        self.display.write_image(image)?;
        if let Some(file) = self.file.as_mut() {
            file.write_image(image)?;
        }
        Ok(())
    }
}

pub struct RemoteSession {
    conn: Connection,
    control: RemoteControl,
    telemetry: TelemetryMonitor,
    hdr: Arc<BulkReassembler>,
    hdr_display: DisplaySink,
    video: Option<VideoClient>,
    version: u32,
    _subscriptions: Vec<Subscription>,
}

impl RemoteSession {
    /// Connect to the configured server and complete the handshake.
    pub async fn connect(config: &ClientConfig) -> Result<Self, PreviewError> {
        let info = config.connection_info().map_err(PreviewError::Other)?;
        info!(server = %info, "connecting to render server");

        let channels = Arc::new(ChannelSet::default_set());
        let conn = tokio::time::timeout(config.connect_timeout(), Connection::connect(&info, channels))
            .await
            .map_err(|_| PreviewError::Timeout(config.connect_timeout()))??;
        Self::handshake(conn, config.hdr_output(), config.handshake_timeout()).await
    }

    /// Subscribe on an established connection, then exchange ready markers.
    pub async fn handshake(
        conn: Connection,
        hdr_output: Option<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, PreviewError> {
        let telemetry = TelemetryMonitor::new();
        let mut subscriptions = telemetry.subscribe(conn.demuxer())?;

        let hdr_display = DisplaySink::new();
        let hdr = Arc::new(BulkReassembler::new(HdrOutput {
            display: hdr_display.clone(),
            file: hdr_output.map(PfmWriter::new),
        })?);
        subscriptions.extend(hdr.subscribe(conn.demuxer())?);

        let video = VideoClient::new(conn.demuxer(), names::RENDER_PREVIEW)?;

        let version = sync_with_peer(conn.muxer(), conn.demuxer(), timeout).await?;
        info!(version, "render server ready");

        Ok(Self {
            control: RemoteControl::new(conn.muxer().clone()),
            conn,
            telemetry,
            hdr,
            hdr_display,
            video: Some(video),
            version,
            _subscriptions: subscriptions,
        })
    }

    /// Push every configured control value to the server.
    pub fn apply_controls(&self, controls: &ControlsConfig) -> Result<(), PreviewError> {
        self.control.set_exposure(controls.exposure)?;
        self.control.set_gamma(controls.gamma)?;
        self.control.set_fov_degrees(controls.fov_degrees)?;
        self.control.set_env_rotation_degrees(controls.env_rotation_degrees)?;
        self.control.set_samples(controls.samples)?;
        if !controls.prompt.is_empty() {
            self.control.set_prompt(&controls.prompt)?;
        }
        if !controls.model_path.is_empty() {
            self.control.set_model_path(&controls.model_path)?;
        }
        Ok(())
    }

    /// Hand the video receiver to the decode side. `None` after the first call.
    pub fn take_video(&mut self) -> Option<VideoClient> {
        self.video.take()
    }

    pub fn control(&self) -> &RemoteControl {
        &self.control
    }

    pub fn telemetry(&self) -> &TelemetryMonitor {
        &self.telemetry
    }

    /// Latest completed HDR image, for display.
    pub fn hdr_display(&self) -> &DisplaySink {
        &self.hdr_display
    }

    pub fn hdr(&self) -> &Arc<BulkReassembler> {
        &self.hdr
    }

    /// Channel-set version agreed in the handshake.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn ok(&self) -> bool {
        self.conn.ok()
    }

    /// Send `stop` or `detach`, give the writer `grace` to flush, then close.
    pub async fn finish(self, stop_server: bool, grace: Duration) {
        let sent = if stop_server {
            self.control.request_stop()
        } else {
            self.control.detach()
        };
        if let Err(e) = sent {
            warn!(error = %e, "could not notify the server");
        } else {
            tokio::time::sleep(grace).await;
        }
        self.conn.close();
        info!(stop_server, "session closed");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use preview_core::state::session_bindings;
    use preview_core::{SessionState, SharedState};

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn handshake_then_controls_and_telemetry() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let channels = Arc::new(ChannelSet::default_set());
        let server = Connection::new(a, Arc::clone(&channels));
        let client = Connection::new(b, channels);

        let state = Arc::new(SharedState::new(SessionState::default()));
        let _bindings = session_bindings().install(server.demuxer(), &state).unwrap();

        let timeout = Duration::from_secs(5);
        let (session, peer) = tokio::join!(
            RemoteSession::handshake(client, None, timeout),
            sync_with_peer(server.muxer(), server.demuxer(), timeout),
        );
        let mut session = session.unwrap();
        assert_eq!(peer.unwrap(), session.version());
        assert!(session.ok());
        assert!(session.take_video().is_some());
        assert!(session.take_video().is_none());

        // Telemetry sent right after the server's marker is not lost.
        server.muxer().send(names::PROGRESS, &0.5f32).unwrap();
        assert!(wait_until(|| session.telemetry().latest().progress.is_some()).await);
        assert_eq!(session.telemetry().latest().progress, Some(0.5));

        let controls = ControlsConfig {
            exposure: 1.5,
            model_path: "scenes/chair.usd".into(),
            ..ControlsConfig::default()
        };
        session.apply_controls(&controls).unwrap();
        assert!(wait_until(|| state.snapshot().model_path == "scenes/chair.usd").await);
        let applied = state.consume_state();
        assert_eq!(applied.exposure, 1.5);
        assert!((applied.fov_radians - 90f32.to_radians()).abs() < 1e-6);
        assert!(applied.prompt.is_empty());

        session.finish(false, Duration::from_millis(20)).await;
        assert!(wait_until(|| state.snapshot().detach).await);
    }
}
