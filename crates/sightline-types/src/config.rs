use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Result, SightlineError};

pub const API_URL_ENV: &str = "SIGHTLINE_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub history_limit: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".into(),
            request_timeout_ms: 5_000,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub stream_confidence_threshold: f32,
    pub stream_iou_threshold: f32,
    pub tick_interval_ms: u64,
    pub jpeg_quality: u8,
    #[serde(default)]
    pub persist_live_results: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.4,
            stream_confidence_threshold: 0.3,
            stream_iou_threshold: 0.5,
            tick_interval_ms: 1_000,
            jpeg_quality: 80,
            persist_live_results: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraSource {
    #[default]
    Synthetic,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub source: CameraSource,
    pub width: u32,
    pub height: u32,
    pub frames_dir: Option<String>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSource::Synthetic,
            width: 640,
            height: 480,
            frames_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
    pub output_dir: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            output_dir: "output".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SightlineConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub ops: OpsConfig,
}

impl SightlineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            SightlineError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            SightlineError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    /// Apply `SIGHTLINE_API_URL` on top of whatever the file said.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.backend.base_url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let base = self.backend.base_url.as_str();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(SightlineError::Configuration(
                "backend.base_url must be an http(s) URL".into(),
            ));
        }
        if self.backend.request_timeout_ms == 0 {
            return Err(SightlineError::Configuration(
                "backend.request_timeout_ms must be greater than zero".into(),
            ));
        }
        for (name, value) in [
            ("detection.confidence_threshold", self.detection.confidence_threshold),
            ("detection.iou_threshold", self.detection.iou_threshold),
            (
                "detection.stream_confidence_threshold",
                self.detection.stream_confidence_threshold,
            ),
            ("detection.stream_iou_threshold", self.detection.stream_iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SightlineError::Configuration(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }
        if self.detection.tick_interval_ms == 0 {
            return Err(SightlineError::Configuration(
                "detection.tick_interval_ms must be greater than zero".into(),
            ));
        }
        if !(1..=100).contains(&self.detection.jpeg_quality) {
            return Err(SightlineError::Configuration(
                "detection.jpeg_quality must be between 1 and 100".into(),
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(SightlineError::Configuration(
                "camera.width and camera.height must be greater than zero".into(),
            ));
        }
        if self.camera.source == CameraSource::Directory && self.camera.frames_dir.is_none() {
            return Err(SightlineError::Configuration(
                "camera.frames_dir is required when camera.source = \"directory\"".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_sightline_config_from_file() {
        let temp_path = std::env::temp_dir().join("sightline-config-test.toml");
        let config = SightlineConfig {
            backend: BackendConfig {
                base_url: "http://detector.local:8000".into(),
                request_timeout_ms: 2_500,
                history_limit: 20,
            },
            detection: DetectionConfig {
                tick_interval_ms: 100,
                persist_live_results: true,
                ..DetectionConfig::default()
            },
            camera: CameraConfig {
                source: CameraSource::Directory,
                width: 1280,
                height: 720,
                frames_dir: Some("frames".into()),
            },
            ops: OpsConfig {
                log_level: "debug".into(),
                output_dir: "out".into(),
            },
        };

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = SightlineConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.backend.base_url, config.backend.base_url);
        assert_eq!(loaded.detection.tick_interval_ms, 100);
        assert!(loaded.detection.persist_live_results);
        assert_eq!(loaded.camera.source, CameraSource::Directory);
        assert!(loaded.validate().is_ok());
        fs::remove_file(&temp_path).expect("cleanup temp config");
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let loaded: SightlineConfig = toml::from_str(
            r#"
            [backend]
            base_url = "http://127.0.0.1:5000/api"
            request_timeout_ms = 1000
            history_limit = 10
            "#,
        )
        .expect("parse partial config");
        assert_eq!(loaded.detection.confidence_threshold, 0.5);
        assert_eq!(loaded.detection.stream_iou_threshold, 0.5);
        assert_eq!(loaded.camera.width, 640);
        assert_eq!(loaded.ops.log_level, "info");
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = SightlineConfig::default();
        assert!(config.validate().is_ok());

        config.backend.base_url = "ftp://nope".into();
        assert!(config.validate().is_err());
        config.backend.base_url = "http://localhost:5000/api".into();
        config.detection.iou_threshold = 1.5;
        assert!(config.validate().is_err());
        config.detection.iou_threshold = 0.4;
        config.detection.tick_interval_ms = 0;
        assert!(config.validate().is_err());
        config.detection.tick_interval_ms = 250;
        config.camera.source = CameraSource::Directory;
        assert!(config.validate().is_err());
        config.camera.frames_dir = Some("frames".into());
        assert!(config.validate().is_ok());
    }
}
