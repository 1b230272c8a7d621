use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySample {
    pub capture_ms: u64,
    pub request_ms: u64,
    pub render_ms: u64,
    pub total_ms: u64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub max_ms: u64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[LatencySample]) -> Self {
        samples.iter().fold(Self::default(), |mut summary, sample| {
            summary.record(sample);
            summary
        })
    }

    /// Fold one more sample into the running mean and max.
    pub fn record(&mut self, sample: &LatencySample) {
        self.samples += 1;
        self.mean_ms += (sample.total_ms as f64 - self.mean_ms) / self.samples as f64;
        self.max_ms = self.max_ms.max(sample.total_ms);
    }
}
