//! Hand-off point between the decode thread and the renderer.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::PreviewError;
use crate::sync::lock;
use crate::video::MAX_FRAME_DIMENSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }
}

impl TryFrom<usize> for PixelLayout {
    type Error = PreviewError;

    fn try_from(channels: usize) -> Result<Self, Self::Error> {
        match channels {
            3 => Ok(Self::Rgb),
            4 => Ok(Self::Rgba),
            other => Err(PreviewError::UnsupportedChannels(other)),
        }
    }
}

/// Packed pixel rows, `width * channels` bytes each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl FrameBuffer {
    /// A frame filled with the "no picture yet" colour: red, half
    /// transparent when there is an alpha channel. Either side may be at
    /// most [`MAX_FRAME_DIMENSION`].
    pub fn placeholder(width: u32, height: u32, layout: PixelLayout) -> Result<Self, PreviewError> {
        let fill: &[u8] = match layout {
            PixelLayout::Rgb => &[255, 0, 0],
            PixelLayout::Rgba => &[255, 0, 0, 128],
        };
        if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
            return Err(PreviewError::InvalidFrame(format!(
                "frame size {width}x{height} exceeds {MAX_FRAME_DIMENSION} per side"
            )));
        }
        let count = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| PreviewError::InvalidFrame(format!("frame size {width}x{height} overflows")))?;
        Ok(Self {
            pixels: fill.repeat(count),
            width,
            height,
            layout,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.channels()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.layout.channels();
        let at = y as usize * self.stride() + x as usize * c;
        self.pixels.get(at..at + c)
    }
}

/// Most recent decoded frame plus link statistics.
///
/// The decode thread writes under the frame lock; the renderer copies
/// out under the same lock and never waits for a new frame.
#[derive(Debug)]
pub struct FrameBridge {
    frame: Mutex<FrameBuffer>,
    bandwidth_mbps: AtomicU64,
    fps: AtomicU64,
    new_frame: AtomicBool,
    frames: AtomicU64,
}

impl FrameBridge {
    pub fn new(frame: FrameBuffer) -> Self {
        Self {
            frame: Mutex::new(frame),
            bandwidth_mbps: AtomicU64::new(0f64.to_bits()),
            fps: AtomicU64::new(0f64.to_bits()),
            new_frame: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        }
    }

    pub fn current_bandwidth_mbps(&self) -> f64 {
        f64::from_bits(self.bandwidth_mbps.load(Ordering::Relaxed))
    }

    pub fn current_fps(&self) -> f64 {
        f64::from_bits(self.fps.load(Ordering::Relaxed))
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Copy the current pixels into `dst`, returning the frame size.
    pub fn upload(&self, dst: &mut Vec<u8>) -> (u32, u32) {
        let frame = lock(&self.frame);
        dst.clear();
        dst.extend_from_slice(frame.pixels());
        (frame.width(), frame.height())
    }

    pub fn snapshot(&self) -> FrameBuffer {
        lock(&self.frame).clone()
    }

    pub fn with_frame<R>(&self, f: impl FnOnce(&FrameBuffer) -> R) -> R {
        f(&lock(&self.frame))
    }

    /// `true` if a frame was published since the last call.
    pub fn take_new_frame(&self) -> bool {
        self.new_frame.swap(false, Ordering::AcqRel)
    }

    pub fn layout(&self) -> PixelLayout {
        lock(&self.frame).layout()
    }

    /// Write into the frame under lock. A successful write publishes it.
    pub(crate) fn write_frame(
        &self,
        f: impl FnOnce(&mut FrameBuffer) -> Result<(), PreviewError>,
    ) -> Result<(), PreviewError> {
        let mut frame = lock(&self.frame);
        f(&mut frame)?;
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.new_frame.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn set_rates(&self, mbps: f64, fps: f64) {
        self.bandwidth_mbps.store(mbps.to_bits(), Ordering::Relaxed);
        self.fps.store(fps.to_bits(), Ordering::Relaxed);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_from_channel_count() {
        assert_eq!(PixelLayout::try_from(3).unwrap(), PixelLayout::Rgb);
        assert_eq!(PixelLayout::try_from(4).unwrap(), PixelLayout::Rgba);
        assert!(matches!(
            PixelLayout::try_from(2),
            Err(PreviewError::UnsupportedChannels(2))
        ));
    }

    #[test]
    fn placeholder_fill() {
        let rgb = FrameBuffer::placeholder(2, 2, PixelLayout::Rgb).unwrap();
        assert_eq!(rgb.pixels().len(), 12);
        assert_eq!(rgb.pixel(1, 1), Some(&[255u8, 0, 0][..]));

        let rgba = FrameBuffer::placeholder(2, 1, PixelLayout::Rgba).unwrap();
        assert_eq!(rgba.pixel(0, 0), Some(&[255u8, 0, 0, 128][..]));
        assert_eq!(rgba.pixel(2, 0), None);
    }

    #[test]
    fn placeholder_refuses_oversized_frame() {
        assert!(matches!(
            FrameBuffer::placeholder(u32::MAX, u32::MAX, PixelLayout::Rgba),
            Err(PreviewError::InvalidFrame(_))
        ));
        assert!(FrameBuffer::placeholder(MAX_FRAME_DIMENSION + 1, 1, PixelLayout::Rgb).is_err());
    }

    #[test]
    fn publish_and_take() {
        let bridge = FrameBridge::new(FrameBuffer::placeholder(1, 1, PixelLayout::Rgb).unwrap());
        assert!(!bridge.take_new_frame());

        bridge
            .write_frame(|f| {
                f.pixels_mut().copy_from_slice(&[1, 2, 3]);
                Ok(())
            })
            .unwrap();
        assert!(bridge.take_new_frame());
        assert!(!bridge.take_new_frame());
        assert_eq!(bridge.frames_decoded(), 1);

        let mut out = Vec::new();
        assert_eq!(bridge.upload(&mut out), (1, 1));
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn failed_write_is_not_published() {
        let bridge = FrameBridge::new(FrameBuffer::placeholder(1, 1, PixelLayout::Rgb).unwrap());
        let r = bridge.write_frame(|_| Err(PreviewError::InvalidFrame("short".into())));
        assert!(r.is_err());
        assert!(!bridge.take_new_frame());
    }

    #[test]
    fn rates_round_trip_through_atomics() {
        let bridge = FrameBridge::new(FrameBuffer::placeholder(1, 1, PixelLayout::Rgb).unwrap());
        bridge.set_rates(12.5, 29.97);
        assert_eq!(bridge.current_bandwidth_mbps(), 12.5);
        assert_eq!(bridge.current_fps(), 29.97);
    }
}
