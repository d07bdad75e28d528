//! Exponentially smoothed bandwidth and frame-rate estimators.

use std::time::Instant;

/// Weight kept from the previous estimate on every update.
pub const RETAIN: f64 = 0.9;

const BITS_PER_MEGABIT: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateEstimate {
    value: f64,
}

impl RateEstimate {
    /// Fold in a new sample. Non-finite samples are ignored and `false`
    /// is returned.
    pub fn update(&mut self, sample: f64) -> bool {
        if !sample.is_finite() {
            return false;
        }
        self.value = RETAIN * self.value + (1.0 - RETAIN) * sample;
        true
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Received-bandwidth estimate in megabits per second.
#[derive(Debug, Clone, Default)]
pub struct BandwidthMeter {
    estimate: RateEstimate,
    last_total: u64,
    last_time: Option<Instant>,
}

impl BandwidthMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the running byte total at the current instant.
    pub fn record(&mut self, total_bytes: u64) -> f64 {
        self.record_at(Instant::now(), total_bytes)
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, now: Instant, total_bytes: u64) -> f64 {
        if let Some(last) = self.last_time {
            let secs = now.saturating_duration_since(last).as_secs_f64();
            let bits = total_bytes.saturating_sub(self.last_total) as f64 * 8.0;
            self.estimate.update(bits / secs / BITS_PER_MEGABIT);
        }
        self.last_total = total_bytes;
        self.last_time = Some(now);
        self.estimate.value()
    }

    pub fn mbps(&self) -> f64 {
        self.estimate.value()
    }
}

/// Decoded frames per second.
#[derive(Debug, Clone, Default)]
pub struct FrameRateMeter {
    estimate: RateEstimate,
    last_frame: Option<Instant>,
}

impl FrameRateMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self) -> f64 {
        self.record_at(Instant::now())
    }

    /// Record a completed frame with an explicit timestamp.
    ///
    /// The interval is measured in whole milliseconds; frames closer
    /// together than that yield an infinite sample, which is dropped.
    pub fn record_at(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last_frame {
            let ms = now.saturating_duration_since(last).as_millis() as f64;
            self.estimate.update(1000.0 / ms);
        }
        self.last_frame = Some(now);
        self.estimate.value()
    }

    pub fn fps(&self) -> f64 {
        self.estimate.value()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn smoothing_weights() {
        let mut e = RateEstimate::default();
        assert!(e.update(10.0));
        assert!((e.value() - 1.0).abs() < 1e-12);
        assert!(e.update(10.0));
        assert!((e.value() - 1.9).abs() < 1e-12);
    }

    #[test]
    fn non_finite_samples_ignored() {
        let mut e = RateEstimate::default();
        e.update(5.0);
        let before = e.value();
        assert!(!e.update(f64::INFINITY));
        assert!(!e.update(f64::NAN));
        assert_eq!(e.value(), before);
    }

    #[test]
    fn bandwidth_in_megabits() {
        let mut m = BandwidthMeter::new();
        let t0 = Instant::now();
        assert_eq!(m.record_at(t0, 0), 0.0);
        // 1 MiB in one second = 8 Mbit/s sample, smoothed to 0.8.
        let v = m.record_at(t0 + Duration::from_secs(1), 1024 * 1024);
        assert!((v - 0.8).abs() < 1e-9, "{v}");
    }

    #[test]
    fn same_instant_sample_discarded() {
        let mut m = BandwidthMeter::new();
        let t0 = Instant::now();
        m.record_at(t0, 0);
        assert_eq!(m.record_at(t0, 4096), 0.0);
    }

    #[test]
    fn fps_from_interval() {
        let mut f = FrameRateMeter::new();
        let t0 = Instant::now();
        f.record_at(t0);
        let v = f.record_at(t0 + Duration::from_millis(20));
        assert!((v - 5.0).abs() < 1e-9, "{v}");
        // Sub-millisecond interval: infinite sample, estimate unchanged.
        assert_eq!(f.record_at(t0 + Duration::from_micros(20_500)), v);
    }
}
