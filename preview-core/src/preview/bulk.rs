//! Reassembly of chunked HDR image transfers and the sinks that
//! receive finished images.
//!
//! A transfer starts with a [`BulkHeader`] and ends when the chunk with
//! `id == chunk_count - 1` arrives. Chunks may be missing or out of order;
//! whatever has been copied by then is what the sink gets.
//!
//! Completed images are handed to the sink on a dedicated `hdr-sink`
//! thread, so the transport task only copies samples.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use tracing::{debug, error, info, trace, warn};

use crate::error::PreviewError;
use crate::network::mux::{Demuxer, Muxer, Subscription};
use crate::protocol::bulk::{BulkChunk, BulkHeader, SAMPLES_PER_PIXEL};
use crate::protocol::channels::names;
use crate::sync::lock;

/// Float RGB image, rows top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<f32>,
}

impl HdrImage {
    pub fn new(width: u32, height: u32, samples: Vec<f32>) -> Result<Self, PreviewError> {
        let expected = width as usize * height as usize * SAMPLES_PER_PIXEL;
        if samples.len() != expected {
            return Err(PreviewError::Bulk(format!(
                "{} samples for a {width}x{height} image, expected {expected}",
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            samples: vec![0.0; width as usize * height as usize * SAMPLES_PER_PIXEL],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * SAMPLES_PER_PIXEL;
        Some([self.samples[at], self.samples[at + 1], self.samples[at + 2]])
    }
}

// ── Sinks ────────────────────────────────────────────────────────

/// Receives every completed transfer, one image at a time, on the
/// reassembler's sink thread.
pub trait HdrSink: Send {
    fn write_image(&mut self, image: &HdrImage) -> Result<(), PreviewError>;
}

impl<F> HdrSink for F
where
    F: FnMut(&HdrImage) -> Result<(), PreviewError> + Send,
{
    fn write_image(&mut self, image: &HdrImage) -> Result<(), PreviewError> {
        self(image)
    }
}

/// Write `image` as a little-endian colour PFM: `PF`, size line, `-1.0`
/// scale line, then float triples with the bottom row first.
pub fn write_pfm<W: Write>(mut writer: W, image: &HdrImage) -> io::Result<()> {
    write!(writer, "PF\n{} {}\n-1.0\n", image.width, image.height)?;
    let row = image.width as usize * SAMPLES_PER_PIXEL;
    if row > 0 {
        for line in image.samples.chunks_exact(row).rev() {
            for sample in line {
                writer.write_all(&sample.to_le_bytes())?;
            }
        }
    }
    writer.flush()
}

/// Saves every completed image to the same file path.
#[derive(Debug, Clone)]
pub struct PfmWriter {
    path: PathBuf,
}

impl PfmWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HdrSink for PfmWriter {
    fn write_image(&mut self, image: &HdrImage) -> Result<(), PreviewError> {
        let file = File::create(&self.path)?;
        write_pfm(BufWriter::new(file), image)?;
        info!(path = %self.path.display(), width = image.width, height = image.height, "HDR image saved");
        Ok(())
    }
}

/// Keeps the latest completed image for display.
#[derive(Debug, Clone, Default)]
pub struct DisplaySink {
    latest: Arc<Mutex<Option<HdrImage>>>,
    generation: Arc<AtomicU64>,
}

impl DisplaySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<HdrImage> {
        lock(&self.latest).clone()
    }

    /// Number of images received; changes whenever a new one lands.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl HdrSink for DisplaySink {
    fn write_image(&mut self, image: &HdrImage) -> Result<(), PreviewError> {
        *lock(&self.latest) = Some(image.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

// ── Reassembler ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkState {
    Idle,
    Receiving { expected: u32, received: u32 },
}

struct Transfer {
    image: Option<HdrImage>,
    chunk_count: u32,
    /// Samples per chunk, taken from the first chunk of the transfer.
    chunk_len: usize,
    received: u32,
}

pub struct BulkReassembler {
    transfer: Mutex<Transfer>,
    completed: Option<mpsc::Sender<HdrImage>>,
    delivered: Arc<AtomicU64>,
    writer: Option<thread::JoinHandle<()>>,
}

impl BulkReassembler {
    /// Spawn the sink thread and start idle.
    pub fn new(sink: impl HdrSink + 'static) -> Result<Self, PreviewError> {
        let (completed, images) = mpsc::channel();
        let delivered = Arc::new(AtomicU64::new(0));
        let writer = {
            let delivered = Arc::clone(&delivered);
            thread::Builder::new()
                .name("hdr-sink".into())
                .spawn(move || write_images(sink, images, delivered))
                .map_err(|e| PreviewError::Other(format!("cannot spawn HDR sink thread: {e}")))?
        };
        Ok(Self {
            transfer: Mutex::new(Transfer {
                image: None,
                chunk_count: 0,
                chunk_len: 0,
                received: 0,
            }),
            completed: Some(completed),
            delivered,
            writer: Some(writer),
        })
    }

    /// Start a new transfer, discarding any partial one.
    pub fn on_header(&self, header: BulkHeader) -> Result<(), PreviewError> {
        let samples = header.sample_count()?;
        let mut t = lock(&self.transfer);
        if t.chunk_count > 0 {
            warn!(received = t.received, expected = t.chunk_count, "partial transfer discarded");
        }
        t.image = Some(HdrImage {
            width: header.width as u32,
            height: header.height as u32,
            samples: vec![0.0; samples],
        });
        t.chunk_count = header.chunk_count;
        t.chunk_len = 0;
        t.received = 0;
        debug!(width = header.width, height = header.height, chunks = header.chunk_count, "HDR transfer started");
        Ok(())
    }

    /// Copy one chunk into place. Returns `true` when it completed the
    /// transfer and the image was queued for the sink.
    pub fn on_chunk(&self, chunk: BulkChunk) -> Result<bool, PreviewError> {
        let mut guard = lock(&self.transfer);
        let t = &mut *guard;
        if t.chunk_count == 0 {
            warn!(id = chunk.id, "chunk outside a transfer dropped");
            return Ok(false);
        }
        if chunk.id >= t.chunk_count {
            warn!(id = chunk.id, expected = t.chunk_count, "chunk id out of range dropped");
            return Ok(false);
        }
        if t.chunk_len == 0 {
            t.chunk_len = chunk.data.len();
        }

        let Some(image) = t.image.as_mut() else {
            return Ok(false);
        };
        let total = image.samples.len();
        let offset = chunk.id as usize * t.chunk_len;
        if offset < total {
            let end = (offset + chunk.data.len()).min(total);
            image.samples[offset..end].copy_from_slice(&chunk.data[..end - offset]);
        }
        t.received += 1;
        trace!(id = chunk.id, offset, "chunk stored");

        if chunk.id + 1 < t.chunk_count {
            return Ok(false);
        }
        if t.received < t.chunk_count {
            warn!(received = t.received, expected = t.chunk_count, "HDR transfer completed with missing chunks");
        }
        t.chunk_count = 0;
        let image = image.clone();
        drop(guard);
        self.completed
            .as_ref()
            .ok_or_else(|| PreviewError::Bulk("HDR sink thread is gone".into()))?
            .send(image)
            .map_err(|_| PreviewError::Bulk("HDR sink thread is gone".into()))?;
        Ok(true)
    }

    /// Number of completed images the sink has finished with, whether or
    /// not it succeeded.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BulkState {
        let t = lock(&self.transfer);
        if t.chunk_count == 0 {
            BulkState::Idle
        } else {
            BulkState::Receiving {
                expected: t.chunk_count,
                received: t.received,
            }
        }
    }

    /// Copy of the reassembly buffer: the last completed image, or the
    /// transfer in progress.
    pub fn current_image(&self) -> Option<HdrImage> {
        lock(&self.transfer).image.clone()
    }

    pub fn save_current(&self, path: impl AsRef<Path>) -> Result<(), PreviewError> {
        let image = self
            .current_image()
            .ok_or_else(|| PreviewError::Bulk("no HDR image received yet".into()))?;
        let file = File::create(path.as_ref())?;
        write_pfm(BufWriter::new(file), &image)?;
        Ok(())
    }

    /// Subscribe to the header and chunk channels. Errors are logged on
    /// the transport task and never propagated.
    pub fn subscribe(self: &Arc<Self>, demuxer: &Demuxer) -> Result<Vec<Subscription>, PreviewError> {
        let on_header = Arc::clone(self);
        let header_sub = demuxer.subscribe_value::<BulkHeader, _>(names::HDR_HEADER, move |header| {
            if let Err(e) = on_header.on_header(header) {
                warn!(error = %e, "rejected HDR header");
            }
        })?;
        let on_chunk = Arc::clone(self);
        let chunk_sub = demuxer.subscribe_value::<BulkChunk, _>(names::HDR_PACKET, move |chunk| {
            if let Err(e) = on_chunk.on_chunk(chunk) {
                error!(error = %e, "HDR chunk not stored");
            }
        })?;
        Ok(vec![header_sub, chunk_sub])
    }
}

impl Drop for BulkReassembler {
    /// Let the sink finish any queued image.
    fn drop(&mut self) {
        drop(self.completed.take());
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("HDR sink thread panicked");
            }
        }
    }
}

fn write_images(mut sink: impl HdrSink, images: mpsc::Receiver<HdrImage>, delivered: Arc<AtomicU64>) {
    for image in images {
        if let Err(e) = sink.write_image(&image) {
            error!(error = %e, width = image.width, height = image.height, "HDR sink failed");
        }
        delivered.fetch_add(1, Ordering::AcqRel);
    }
    debug!("HDR sink thread exiting");
}

/// Send `image` as one header plus `ceil(samples / chunk_len)` chunks.
/// Returns the number of chunks sent.
pub fn send_hdr_image(muxer: &Muxer, image: &HdrImage, chunk_len: usize) -> Result<u32, PreviewError> {
    if chunk_len == 0 {
        return Err(PreviewError::Bulk("chunk length must be non-zero".into()));
    }
    let chunks = image.samples.len().div_ceil(chunk_len).max(1);
    let chunk_count = u32::try_from(chunks).map_err(|_| PreviewError::Bulk("too many chunks".into()))?;
    let width = i32::try_from(image.width).map_err(|_| PreviewError::Bulk("width out of range".into()))?;
    let height = i32::try_from(image.height).map_err(|_| PreviewError::Bulk("height out of range".into()))?;
    let header = BulkHeader::new(width, height, chunk_count);
    header.sample_count()?;

    muxer.send(names::HDR_HEADER, &header)?;
    for id in 0..chunk_count {
        let start = (id as usize * chunk_len).min(image.samples.len());
        let end = (start + chunk_len).min(image.samples.len());
        let chunk = BulkChunk {
            id,
            data: image.samples[start..end].to_vec(),
        };
        muxer.send(names::HDR_PACKET, &chunk)?;
    }
    debug!(chunks = chunk_count, "HDR image sent");
    Ok(chunk_count)
}

// ── Tests ────────────────────────────────────────────────────────
