use serde::{Deserialize, Serialize};

use crate::detection::DetectionBatch;

/// Live-detection state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    CameraActive,
    Detecting,
}

impl SessionPhase {
    pub fn camera_active(self) -> bool {
        matches!(self, Self::CameraActive | Self::Detecting)
    }
}

/// State that lives for one camera session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveSessionState {
    pub camera_active: bool,
    pub live_detection_enabled: bool,
    pub last_detection_batch: DetectionBatch,
    pub last_inference_latency_ms: Option<u64>,
    /// Ticks whose detection call failed or timed out. Not user-facing.
    pub failed_ticks: u64,
}

impl LiveSessionState {
    pub fn phase(&self) -> SessionPhase {
        match (self.camera_active, self.live_detection_enabled) {
            (false, _) => SessionPhase::Idle,
            (true, false) => SessionPhase::CameraActive,
            (true, true) => SessionPhase::Detecting,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
