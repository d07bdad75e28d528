use serde::{Deserialize, Serialize};

/// Renderer throughput reported on the `sample_rate` channel.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SampleRates {
    /// Paths traced per second.
    pub path_rate: f32,
    /// Rays cast per second.
    pub ray_rate: f32,
}

impl SampleRates {
    pub fn new(path_rate: f32, ray_rate: f32) -> Self {
        Self {
            path_rate,
            ray_rate,
        }
    }
}

/// Progress of the current render as a fraction in `[0, 1]`.
pub fn progress_fraction(step: u32, total: u32) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (step as f32 / total as f32).clamp(0.0, 1.0)
}
