//! Client side of the detection backend: request options, backend traits and
//! the reqwest-based HTTP implementation.

mod http;
mod wire;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sightline_types::{
    config::DetectionConfig,
    detection::{DetectionBatch, HistoryRecord},
    vision::EncodedImage,
    Result, SightlineError,
};

pub use http::HttpDetectionClient;

/// Which backend operation a detect call maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectMode {
    #[default]
    SingleShot,
    Stream,
    /// Detect and ask the backend to persist the result as a history record.
    WithHistory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectOptions {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub mode: DetectMode,
    /// Echoed back by the streaming endpoint.
    pub timestamp: Option<i64>,
}

impl DetectOptions {
    pub fn single_shot() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.4,
            mode: DetectMode::SingleShot,
            timestamp: None,
        }
    }

    pub fn streaming() -> Self {
        Self {
            confidence_threshold: 0.3,
            iou_threshold: 0.5,
            mode: DetectMode::Stream,
            timestamp: None,
        }
    }

    /// Thresholds from configuration; streaming modes use the looser pair.
    pub fn from_config(config: &DetectionConfig, mode: DetectMode) -> Self {
        let (confidence_threshold, iou_threshold) = match mode {
            DetectMode::SingleShot => (config.confidence_threshold, config.iou_threshold),
            DetectMode::Stream | DetectMode::WithHistory => (
                config.stream_confidence_threshold,
                config.stream_iou_threshold,
            ),
        };
        Self {
            confidence_threshold,
            iou_threshold,
            mode,
            timestamp: None,
        }
    }

    pub fn with_thresholds(mut self, confidence_threshold: f32, iou_threshold: f32) -> Self {
        self.confidence_threshold = confidence_threshold;
        self.iou_threshold = iou_threshold;
        self
    }

    pub fn with_mode(mut self, mode: DetectMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SightlineError::Configuration(
                "confidence threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(SightlineError::Configuration(
                "IoU threshold must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self::single_shot()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

impl HealthStatus {
    pub fn is_ready(&self) -> bool {
        self.model_loaded
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelInfo {
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub num_classes: usize,
    #[serde(default)]
    pub model_path: String,
}

/// What the backend sent back for an uploaded video.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoResult {
    Processed { content_type: String, bytes: Vec<u8> },
    Detections(DetectionBatch),
}

#[async_trait]
pub trait DetectionBackend: Send + Sync {
    async fn detect(&self, payload: &EncodedImage, options: &DetectOptions)
        -> Result<DetectionBatch>;
    async fn health(&self) -> Result<HealthStatus>;
}

#[async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn list_history(&self, limit: u32, offset: u32) -> Result<Vec<HistoryRecord>>;
    async fn delete_record(&self, id: &str) -> Result<()>;
    async fn clear_history(&self) -> Result<()>;
}

#[async_trait]
impl<T: DetectionBackend + ?Sized> DetectionBackend for Arc<T> {
    async fn detect(
        &self,
        payload: &EncodedImage,
        options: &DetectOptions,
    ) -> Result<DetectionBatch> {
        (**self).detect(payload, options).await
    }

    async fn health(&self) -> Result<HealthStatus> {
        (**self).health().await
    }
}

#[async_trait]
impl<T: HistoryBackend + ?Sized> HistoryBackend for Arc<T> {
    async fn list_history(&self, limit: u32, offset: u32) -> Result<Vec<HistoryRecord>> {
        (**self).list_history(limit, offset).await
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        (**self).delete_record(id).await
    }

    async fn clear_history(&self) -> Result<()> {
        (**self).clear_history().await
    }
}

pub fn network_error(message: impl Into<String>) -> SightlineError {
    SightlineError::Network(message.into())
}

pub fn decode_error(message: impl Into<String>) -> SightlineError {
    SightlineError::Decode(message.into())
}
