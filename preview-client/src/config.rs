//! Remote UI configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use preview_core::ConnectionInfo;
use preview_core::server::DEFAULT_PORT;

/// Top-level configuration for the remote UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Video decode settings.
    pub video: VideoConfig,
    /// Presentation settings.
    pub display: DisplayConfig,
    /// HDR image output.
    pub hdr: HdrConfig,
    /// Control values pushed after the handshake.
    pub controls: ControlsConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address as `host:port`.
    pub server_address: String,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Seconds to wait for the server's ready marker.
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Output channels: 3 (RGB) or 4 (RGBA).
    pub channels: usize,
    /// Seconds without video data before the stream is declared stalled.
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Presentation rate.
    pub refresh_hz: u32,
    /// Seconds between stats log lines.
    pub stats_interval_secs: u64,
    /// Write the last presented frame here on exit (binary PPM). Empty = off.
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HdrConfig {
    /// PFM file each completed HDR image is written to. Empty = keep in memory only.
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub exposure: f32,
    pub gamma: f32,
    pub fov_degrees: f32,
    pub env_rotation_degrees: f32,
    pub samples: u32,
    pub prompt: String,
    /// Model the server should load. Empty = no request.
    pub model_path: String,
    /// Detach after this many seconds. 0 = run until Ctrl-C.
    pub run_for_secs: u64,
    /// Ask the server to stop on exit instead of detaching.
    pub stop_server_on_exit: bool,
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
            server_address: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout_ms: 5000,
            handshake_timeout_secs: 10,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            channels: 4,
            idle_timeout_secs: 10,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60,
            stats_interval_secs: 2,
            snapshot_path: String::new(),
        }
    }
}

impl Default for HdrConfig {
    fn default() -> Self {
        Self {
            output_path: "preview.pfm".into(),
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            exposure: 0.0,
            gamma: 2.2,
            fov_degrees: 90.0,
            env_rotation_degrees: 0.0,
            samples: 1,
            prompt: String::new(),
            model_path: String::new(),
            run_for_secs: 0,
            stop_server_on_exit: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
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

    /// Split `server_address` into host and port.
    pub fn connection_info(&self) -> Result<ConnectionInfo, String> {
        let addr = self.network.server_address.trim();
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("server address {addr:?} has no port"))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("bad port in server address {addr:?}: {e}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("server address {addr:?} has no host"));
        }
        Ok(ConnectionInfo::new(host, port))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.network.handshake_timeout_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.video.idle_timeout_secs.max(1))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.display.refresh_hz.clamp(1, 240)))
    }

    pub fn hdr_output(&self) -> Option<PathBuf> {
        (!self.hdr.output_path.is_empty()).then(|| PathBuf::from(&self.hdr.output_path))
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        (!self.display.snapshot_path.is_empty()).then(|| PathBuf::from(&self.display.snapshot_path))
    }
}

// ── Tests ────────────────────────────────────────────────────────
