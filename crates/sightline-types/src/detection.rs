use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// One labelled box for one object instance in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<u32>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
            class_id: None,
        }
    }

    /// Text drawn on the label tag, e.g. `bottle 91.0%`.
    pub fn tag_text(&self) -> String {
        format!("{} {:.1}%", self.label, self.confidence * 100.0)
    }
}

/// All detections produced by a single inference call, in backend order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
    /// Pixel size of the image the boxes refer to, when known.
    pub source_size: Option<(u32, u32)>,
    /// Processed preview returned by the backend (base64 JPEG), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_image: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            source_size: None,
            processed_image: None,
            received_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_source_size(mut self, width: u32, height: u32) -> Self {
        self.source_size = Some((width, height));
        self
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }
}

impl Default for DetectionBatch {
    fn default() -> Self {
        Self::empty()
    }
}

/// Past detection result persisted by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_image: Option<String>,
}
