//! Headless presentation of decoded frames.
//!
//! Samples the [`FrameBridge`] at display cadence the way a window would
//! upload a texture, counts what it presents, and can dump the last frame
//! as a binary PPM.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use preview_core::{FrameBridge, PixelLayout};

use crate::telemetry::Telemetry;

pub struct HeadlessDisplay {
    bridge: Arc<FrameBridge>,
    texture: Vec<u8>,
    size: (u32, u32),
    presented: u64,
    stats_interval: Duration,
    last_stats: Instant,
}

impl HeadlessDisplay {
    pub fn new(bridge: Arc<FrameBridge>, stats_interval: Duration) -> Self {
        Self {
            bridge,
            texture: Vec::new(),
            size: (0, 0),
            presented: 0,
            stats_interval,
            last_stats: Instant::now(),
        }
    }

    /// Upload the latest frame if a new one was decoded since the last call.
    pub fn present(&mut self) -> bool {
        if !self.bridge.take_new_frame() {
            return false;
        }
        self.size = self.bridge.upload(&mut self.texture);
        self.presented += 1;
        debug!(frame = self.presented, width = self.size.0, height = self.size.1, "presented");
        true
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Size of the last uploaded frame.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn stats_line(&self, telemetry: &Telemetry) -> String {
        format!(
            "{}x{} | {:.1} fps | {:.2} Mbit/s | decoded {} | presented {} | {}",
            self.size.0,
            self.size.1,
            self.bridge.current_fps(),
            self.bridge.current_bandwidth_mbps(),
            self.bridge.frames_decoded(),
            self.presented,
            telemetry,
        )
    }

    /// Log the stats line once per interval.
    pub fn maybe_log_stats(&mut self, telemetry: &Telemetry) {
        if self.last_stats.elapsed() >= self.stats_interval {
            self.last_stats = Instant::now();
            info!("{}", self.stats_line(telemetry));
        }
    }

    /// Write the last presented frame as a binary PPM. Alpha is dropped.
    pub fn write_snapshot(&self, path: &Path) -> io::Result<()> {
        let (width, height) = self.size;
        if width == 0 || height == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "no frame presented yet"));
        }
        let mut out = BufWriter::new(File::create(path)?);
        write_ppm(&mut out, &self.texture, width, height, self.bridge.layout())?;
        out.flush()?;
        info!(path = %path.display(), width, height, "snapshot written");
        Ok(())
    }
}

fn write_ppm<W: Write>(out: &mut W, pixels: &[u8], width: u32, height: u32, layout: PixelLayout) -> io::Result<()> {
    write!(out, "P6\n{width} {height}\n255\n")?;
    match layout {
        PixelLayout::Rgb => out.write_all(pixels),
        PixelLayout::Rgba => {
            for px in pixels.chunks_exact(4) {
                out.write_all(&px[..3])?;
            }
            Ok(())
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use preview_core::FrameBuffer;

    #[test]
    fn nothing_to_present_initially() {
        let bridge = Arc::new(FrameBridge::new(FrameBuffer::placeholder(4, 2, PixelLayout::Rgba).unwrap()));
        let mut display = HeadlessDisplay::new(bridge, Duration::from_secs(1));
        assert!(!display.present());
        assert_eq!(display.presented(), 0);
        assert!(display.write_snapshot(Path::new("unused.ppm")).is_err());
    }

    #[test]
    fn stats_line_mentions_telemetry() {
        let bridge = Arc::new(FrameBridge::new(FrameBuffer::placeholder(4, 2, PixelLayout::Rgb).unwrap()));
        let display = HeadlessDisplay::new(bridge, Duration::from_secs(1));
        let line = display.stats_line(&Telemetry::default());
        assert!(line.contains("0.0 fps"));
        assert!(line.ends_with("progress -, rates -"));
    }

    #[test]
    fn ppm_drops_alpha() {
        let mut out = Vec::new();
        write_ppm(&mut out, &[1, 2, 3, 255, 4, 5, 6, 255], 2, 1, PixelLayout::Rgba).unwrap();
        assert_eq!(out, b"P6\n2 1\n255\n\x01\x02\x03\x04\x05\x06");
    }
}
