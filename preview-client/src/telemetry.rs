//! Latest progress and sample-rate values reported by the server.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use preview_core::{Demuxer, PreviewError, SampleRates, Subscription, names};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    /// Render progress in [0, 1].
    pub progress: Option<f32>,
    pub rates: Option<SampleRates>,
    /// Number of telemetry packets seen.
    pub updates: u64,
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.progress {
            Some(p) => write!(f, "progress {:.0}%", p * 100.0)?,
            None => write!(f, "progress -")?,
        }
        match self.rates {
            Some(r) => write!(
                f,
                ", {:.2} Mpaths/s, {:.2} Mrays/s",
                r.path_rate / 1e6,
                r.ray_rate / 1e6
            ),
            None => write!(f, ", rates -"),
        }
    }
}

/// Subscribes to the telemetry channels and keeps the newest values.
#[derive(Debug, Clone, Default)]
pub struct TelemetryMonitor {
    latest: Arc<Mutex<Telemetry>>,
}

impl TelemetryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register handlers on `demuxer`. Drop the subscriptions to stop.
    pub fn subscribe(&self, demuxer: &Demuxer) -> Result<Vec<Subscription>, PreviewError> {
        let progress = {
            let latest = Arc::clone(&self.latest);
            demuxer.subscribe_value::<f32, _>(names::PROGRESS, move |p| {
                trace!(progress = p, "progress");
                let mut t = latest.lock().unwrap_or_else(PoisonError::into_inner);
                t.progress = Some(p.clamp(0.0, 1.0));
                t.updates += 1;
            })?
        };
        let rates = {
            let latest = Arc::clone(&self.latest);
            demuxer.subscribe_value::<SampleRates, _>(names::SAMPLE_RATE, move |r| {
                trace!(path_rate = r.path_rate, ray_rate = r.ray_rate, "sample rate");
                let mut t = latest.lock().unwrap_or_else(PoisonError::into_inner);
                t.rates = Some(r);
                t.updates += 1;
            })?
        };
        Ok(vec![progress, rates])
    }

    pub fn latest(&self) -> Telemetry {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ────────────────────────────────────────────────────────
