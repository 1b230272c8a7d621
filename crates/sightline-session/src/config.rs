use std::time::Duration;

use sightline_client::{DetectMode, DetectOptions};
use sightline_types::config::SightlineConfig;

/// Knobs for one live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tick_interval: Duration,
    /// Upper bound on capture + detect for one tick.
    pub request_timeout: Duration,
    pub jpeg_quality: u8,
    pub options: DetectOptions,
}

impl SessionConfig {
    pub fn from_config(config: &SightlineConfig) -> Self {
        let mode = if config.detection.persist_live_results {
            DetectMode::WithHistory
        } else {
            DetectMode::Stream
        };
        Self {
            tick_interval: Duration::from_millis(config.detection.tick_interval_ms),
            request_timeout: Duration::from_millis(config.backend.request_timeout_ms),
            jpeg_quality: config.detection.jpeg_quality,
            options: DetectOptions::from_config(&config.detection, mode),
        }
    }

    pub fn persists_results(&self) -> bool {
        self.options.mode == DetectMode::WithHistory
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&SightlineConfig::default())
    }
}
