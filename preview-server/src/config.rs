//! Configuration for the test render server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use preview_core::ChannelSet;
use preview_core::server::{DEFAULT_PORT, ServerConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderServerConfig {
    /// Listener settings.
    pub network: NetworkConfig,
    /// Preview stream settings.
    pub stream: StreamConfig,
    /// HDR bulk transfer settings.
    pub hdr: HdrConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    /// TCP port for the interface connection.
    pub port: u16,
    /// Seconds to wait for the client's ready marker.
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    /// Target frames per second.
    pub fps: u32,
    /// zstd level for preview frames.
    pub compression_level: i32,
    /// Steps per fake progress cycle.
    pub total_steps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HdrConfig {
    /// Send one HDR test image after the handshake.
    pub send_on_connect: bool,
    /// Float samples per chunk.
    pub chunk_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            handshake_timeout_secs: 30,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            compression_level: 1,
            total_steps: 100,
        }
    }
}

impl Default for HdrConfig {
    fn default() -> Self {
        Self {
            send_on_connect: true,
            chunk_len: 64 * 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl RenderServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Interval between preview frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.stream.fps.clamp(1, 240)))
    }

    /// Convert into the library's `ServerConfig`.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_address: self.network.bind_address.clone(),
            port: self.network.port,
            handshake_timeout: Duration::from_secs(self.network.handshake_timeout_secs.max(1)),
            video_fps: self.stream.fps.clamp(1, 240),
            compression_level: self.stream.compression_level,
            hdr_chunk_len: self.hdr.chunk_len.max(1),
            channels: Arc::new(ChannelSet::default_set()),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&RenderServerConfig::default()).unwrap();
        assert!(text.contains("[network]"));
        assert!(text.contains("handshake_timeout_secs"));
        assert!(text.contains("chunk_len"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: RenderServerConfig = toml::from_str("[stream]\nwidth = 320\n").unwrap();
        assert_eq!(cfg.stream.width, 320);
        assert_eq!(cfg.stream.height, 480);
        assert_eq!(cfg.network.port, DEFAULT_PORT);
    }

    #[test]
    fn to_server_config_clamps() {
        let mut cfg = RenderServerConfig::default();
        cfg.stream.fps = 0;
        cfg.hdr.chunk_len = 0;
        let server = cfg.to_server_config();
        assert_eq!(server.video_fps, 1);
        assert_eq!(server.hdr_chunk_len, 1);
        assert_eq!(cfg.frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = RenderServerConfig::load(Path::new("/nonexistent/preview-server.toml"));
        assert_eq!(cfg.stream.fps, 30);
    }
}
