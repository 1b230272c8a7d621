//! Frame sources and the capture adapter that turns frames into JPEG payloads.

mod encode;
mod sequence;
mod synthetic;

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use sightline_types::{
    config::{CameraConfig, CameraSource},
    vision::ImageFrame,
    Result, SightlineError,
};

pub use encode::{encode_frame, load_image_file};
pub use sequence::ImageSequenceCamera;
pub use synthetic::SyntheticCamera;

/// A live video source that must be acquired before frames can be read.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Acquire the stream and report its native pixel size.
    async fn open(&self) -> Result<(u32, u32)>;
    async fn capture_frame(&self) -> Result<ImageFrame>;
    async fn close(&self) -> Result<()>;
    fn is_open(&self) -> bool;
}

/// Build the camera selected in the configuration.
pub fn camera_from_config(config: &CameraConfig) -> Result<Arc<dyn Camera>> {
    match config.source {
        CameraSource::Synthetic => Ok(Arc::new(SyntheticCamera::new(config.width, config.height))),
        CameraSource::Directory => {
            let dir = config.frames_dir.as_deref().ok_or_else(|| {
                SightlineError::Configuration("camera.frames_dir is not set".into())
            })?;
            Ok(Arc::new(ImageSequenceCamera::new(Path::new(dir))))
        }
    }
}

pub fn capture_error(message: impl Into<String>) -> SightlineError {
    SightlineError::Capture(message.into())
}

pub fn camera_access_error(message: impl Into<String>) -> SightlineError {
    SightlineError::CameraAccess(message.into())
}
