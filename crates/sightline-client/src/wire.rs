//! Backend JSON shapes and their conversion into canonical domain types.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sightline_types::{
    detection::{Detection, DetectionBatch, HistoryRecord},
    geometry::BoundingBox,
    Result, SightlineError,
};

use crate::decode_error;

#[derive(Debug, Serialize)]
pub(crate) struct DetectRequestBody<'a> {
    pub image: &'a str,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Strip the `{success, data, error}` envelope when present.
///
/// Bodies without a boolean `success` field are returned unchanged.
pub(crate) fn unwrap_envelope(body: Value) -> Result<Value> {
    let Value::Object(mut map) = body else {
        return Ok(body);
    };
    let Some(success) = map.get("success").and_then(Value::as_bool) else {
        return Ok(Value::Object(map));
    };
    if success {
        return Ok(map.remove("data").unwrap_or(Value::Null));
    }
    let error = map
        .remove("error")
        .and_then(|err| match err {
            Value::String(message) => Some(WireError {
                message: Some(message),
                code: None,
            }),
            other => serde_json::from_value::<WireError>(other).ok(),
        })
        .unwrap_or(WireError {
            message: None,
            code: None,
        });
    Err(SightlineError::Backend {
        message: error.message.unwrap_or_else(|| "request failed".into()),
        code: error.code.unwrap_or_else(|| "UNKNOWN".into()),
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireRect {
    Size {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Corners {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
    },
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(alias = "class_name", alias = "name")]
    label: String,
    confidence: f32,
    #[serde(rename = "box", default)]
    rect: Option<WireRect>,
    #[serde(default)]
    bbox: Option<[f32; 4]>,
    #[serde(default)]
    class_id: Option<u32>,
}

impl TryFrom<WireDetection> for Detection {
    type Error = SightlineError;

    fn try_from(wire: WireDetection) -> Result<Self> {
        let bbox = match (wire.rect, wire.bbox) {
            (Some(WireRect::Size { x, y, width, height }), _) => {
                BoundingBox::from_xywh(x, y, width, height)
            }
            (Some(WireRect::Corners { x1, y1, x2, y2 }), _) => {
                BoundingBox::from_corners(x1, y1, x2, y2)
            }
            (None, Some([x1, y1, x2, y2])) => BoundingBox::from_corners(x1, y1, x2, y2),
            (None, None) => {
                return Err(decode_error(format!(
                    "detection '{}' carries no box",
                    wire.label
                )))
            }
        };
        if !bbox.is_finite() {
            return Err(decode_error(format!(
                "detection '{}' has a non-finite box",
                wire.label
            )));
        }
        Ok(Detection {
            label: wire.label,
            confidence: wire.confidence.clamp(0.0, 1.0),
            bbox,
            class_id: wire.class_id,
        })
    }
}

fn convert_detections(wire: Vec<WireDetection>) -> Result<Vec<Detection>> {
    wire.into_iter().map(Detection::try_from).collect()
}

#[derive(Debug, Deserialize)]
struct WireDetectionData {
    #[serde(default)]
    detections: Vec<WireDetection>,
    #[serde(default)]
    count: Option<usize>,
    #[serde(default, alias = "annotated_image")]
    processed_image: Option<String>,
}

/// Decode an unwrapped detection payload.
pub(crate) fn parse_detection_data(data: Value) -> Result<DetectionBatch> {
    let data: WireDetectionData = match data {
        Value::Null => return Ok(DetectionBatch::empty()),
        Value::Array(items) => WireDetectionData {
            detections: serde_json::from_value(Value::Array(items))
                .map_err(|err| decode_error(format!("detection list: {err}")))?,
            count: None,
            processed_image: None,
        },
        other => serde_json::from_value(other)
            .map_err(|err| decode_error(format!("detection envelope: {err}")))?,
    };
    let detections = convert_detections(data.detections)?;
    if let Some(count) = data.count {
        if count != detections.len() {
            tracing::debug!(
                "backend count {} differs from {} decoded detections",
                count,
                detections.len()
            );
        }
    }
    let mut batch = DetectionBatch::new(detections);
    batch.processed_image = data.processed_image;
    Ok(batch)
}

#[derive(Debug, Deserialize)]
struct WireHistoryRecord {
    #[serde(alias = "detection_id", alias = "_id")]
    id: Value,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    detections: Vec<WireDetection>,
    #[serde(default, alias = "annotated_image")]
    processed_image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireHistory {
    Bare(Vec<WireHistoryRecord>),
    Wrapped {
        #[serde(alias = "items")]
        records: Vec<WireHistoryRecord>,
    },
}

pub(crate) fn parse_history(data: Value) -> Result<Vec<HistoryRecord>> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    let history: WireHistory = serde_json::from_value(data)
        .map_err(|err| decode_error(format!("history payload: {err}")))?;
    let records = match history {
        WireHistory::Bare(records) | WireHistory::Wrapped { records } => records,
    };
    records
        .into_iter()
        .map(|record| {
            Ok(HistoryRecord {
                id: parse_id(&record.id)?,
                timestamp: parse_timestamp(&record.timestamp)?,
                detections: convert_detections(record.detections)?,
                processed_image: record.processed_image,
            })
        })
        .collect()
}

fn parse_id(value: &Value) -> Result<String> {
    match value {
        Value::String(id) if !id.is_empty() => Ok(id.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(decode_error(format!("invalid history id: {other}"))),
    }
}

/// Seconds or milliseconds since the epoch, RFC 3339, or a naive ISO string
/// (taken as UTC).
pub(crate) fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(from_epoch)
            .ok_or_else(|| decode_error(format!("timestamp out of range: {n}"))),
        Value::String(s) => parse_timestamp_str(s.trim())
            .ok_or_else(|| decode_error(format!("unrecognised timestamp: {s}"))),
        other => Err(decode_error(format!("missing or invalid timestamp: {other}"))),
    }
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    // Anything past year ~5138 in seconds is treated as milliseconds.
    let millis = if value.abs() > 1e11 { value } else { value * 1000.0 };
    Utc.timestamp_millis_opt(millis.round() as i64).single()
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    s.parse::<f64>().ok().and_then(from_epoch)
}
