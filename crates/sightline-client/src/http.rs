use std::{path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder};
use serde_json::{json, Value};
use sightline_types::{
    config::BackendConfig,
    detection::{DetectionBatch, HistoryRecord},
    vision::EncodedImage,
    Result, SightlineError,
};
use tracing::debug;

use crate::{
    decode_error, network_error,
    wire::{parse_detection_data, parse_history, unwrap_envelope, DetectRequestBody},
    DetectMode, DetectOptions, DetectionBackend, HealthStatus, HistoryBackend, ModelInfo,
    VideoResult,
};

/// HTTP client for the detection backend.
///
/// Construct once and hand clones to whoever needs it; clones share the
/// underlying connection pool.
#[derive(Clone)]
pub struct HttpDetectionClient {
    client: Client,
    base_url: String,
}

impl HttpDetectionClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| network_error(format!("failed to create HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send the request and return the unwrapped `data` value.
    async fn send(&self, what: &str, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|err| network_error(format!("{what}: {err}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| network_error(format!("{what}: failed to read body: {err}")))?;
        if !status.is_success() {
            return Err(network_error(format!(
                "{what}: HTTP {status}{}",
                error_hint(&body)
            )));
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_slice(&body)
            .map_err(|err| decode_error(format!("{what}: body is not JSON: {err}")))?;
        unwrap_envelope(value)
    }

    pub async fn model_info(&self) -> Result<ModelInfo> {
        let data = self
            .send("model info", self.client.get(self.url("model/info")))
            .await?;
        serde_json::from_value(data).map_err(|err| decode_error(format!("model info: {err}")))
    }

    /// Upload a video file; the backend answers with either a processed video
    /// or a JSON detection envelope.
    pub async fn detect_video(&self, path: &Path) -> Result<VideoResult> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| {
                SightlineError::Capture(format!("cannot read {}: {err}", path.display()))
            })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.mp4")
            .to_string();
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(video_mime(path))
            .map_err(|err| network_error(format!("invalid video mime: {err}")))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("video"))
            .multipart(form)
            .send()
            .await
            .map_err(|err| network_error(format!("video upload: {err}")))?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|err| network_error(format!("video upload: failed to read body: {err}")))?;
        if !status.is_success() {
            return Err(network_error(format!(
                "video upload: HTTP {status}{}",
                error_hint(&body)
            )));
        }
        if content_type.starts_with("application/json") {
            let value: Value = serde_json::from_slice(&body)
                .map_err(|err| decode_error(format!("video upload: {err}")))?;
            return parse_detection_data(unwrap_envelope(value)?).map(VideoResult::Detections);
        }
        Ok(VideoResult::Processed {
            content_type,
            bytes: body.to_vec(),
        })
    }
}

#[async_trait]
impl DetectionBackend for HttpDetectionClient {
    async fn detect(
        &self,
        payload: &EncodedImage,
        options: &DetectOptions,
    ) -> Result<DetectionBatch> {
        options.validate()?;
        let path = match options.mode {
            DetectMode::SingleShot => "detect",
            DetectMode::Stream => "detect/stream",
            DetectMode::WithHistory => "detect-history",
        };
        let image = payload.to_base64();
        let body = DetectRequestBody {
            image: &image,
            confidence_threshold: options.confidence_threshold,
            iou_threshold: options.iou_threshold,
            timestamp: options.timestamp,
        };
        debug!(
            "POST /{} ({} bytes, conf={}, iou={})",
            path,
            payload.bytes.len(),
            options.confidence_threshold,
            options.iou_threshold
        );
        let data = self
            .send("detect", self.client.post(self.url(path)).json(&body))
            .await?;
        Ok(parse_detection_data(data)?.with_source_size(payload.width, payload.height))
    }

    async fn health(&self) -> Result<HealthStatus> {
        let data = self
            .send("health", self.client.get(self.url("health")))
            .await?;
        serde_json::from_value(data).map_err(|err| decode_error(format!("health: {err}")))
    }
}

#[async_trait]
impl HistoryBackend for HttpDetectionClient {
    async fn list_history(&self, limit: u32, offset: u32) -> Result<Vec<HistoryRecord>> {
        let request = self
            .client
            .get(self.url("history"))
            .query(&[("limit", limit), ("offset", offset)]);
        let data = self.send("history", request).await?;
        parse_history(data)
    }

    async fn delete_record(&self, id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.url("history-delete"))
            .query(&[("detection_id", id)]);
        self.send("history delete", request).await?;
        Ok(())
    }

    async fn clear_history(&self) -> Result<()> {
        let request = self
            .client
            .delete(self.url("history-delete"))
            .json(&json!({ "clear_all": true }));
        self.send("history clear", request).await?;
        Ok(())
    }
}

fn video_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        _ => "video/mp4",
    }
}

/// Best-effort message from a failed response body.
fn error_hint(body: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return String::new();
    };
    match unwrap_envelope(value) {
        Err(err) => format!(" ({err})"),
        Ok(Value::Object(map)) => map
            .get("error")
            .or_else(|| map.get("detail"))
            .map(|detail| format!(" ({detail})"))
            .unwrap_or_default(),
        Ok(_) => String::new(),
    }
}
