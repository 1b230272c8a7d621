use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use sightline_types::{vision::ImageFrame, Result};
use tracing::{debug, info};

use crate::{camera_access_error, capture_error, Camera};

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Plays back the still images of a directory in name order, looping forever.
pub struct ImageSequenceCamera {
    dir: PathBuf,
    open: AtomicBool,
    state: Mutex<SequenceState>,
}

#[derive(Default)]
struct SequenceState {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequenceCamera {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            open: AtomicBool::new(false),
            state: Mutex::new(SequenceState::default()),
        }
    }

    fn scan(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|err| {
            camera_access_error(format!("cannot read {}: {err}", self.dir.display()))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn next_path(&self) -> Result<PathBuf> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| capture_error("failed to lock frame sequence"))?;
        if state.files.is_empty() {
            return Err(camera_access_error("frame sequence is empty"));
        }
        let path = state.files[state.cursor % state.files.len()].clone();
        state.cursor = (state.cursor + 1) % state.files.len();
        Ok(path)
    }
}

#[async_trait]
impl Camera for ImageSequenceCamera {
    async fn open(&self) -> Result<(u32, u32)> {
        let files = self.scan()?;
        let Some(first) = files.first() else {
            return Err(camera_access_error(format!(
                "no jpeg/png frames in {}",
                self.dir.display()
            )));
        };
        let dims = image::image_dimensions(first)
            .map_err(|err| camera_access_error(format!("unreadable frame {}: {err}", first.display())))?;
        info!(
            "Image sequence camera opened with {} frames from {:?} at {}x{}",
            files.len(),
            self.dir,
            dims.0,
            dims.1
        );
        let mut state = self
            .state
            .lock()
            .map_err(|_| capture_error("failed to lock frame sequence"))?;
        state.files = files;
        state.cursor = 0;
        self.open.store(true, Ordering::SeqCst);
        Ok(dims)
    }

    async fn capture_frame(&self) -> Result<ImageFrame> {
        if !self.is_open() {
            return Err(camera_access_error("camera is not open"));
        }
        let path = self.next_path()?;
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|err| capture_error(format!("failed to read {}: {err}", path.display())))?;
        let img = image::load_from_memory(&raw)
            .map_err(|err| capture_error(format!("failed to decode {}: {err}", path.display())))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        debug!("Captured {:?} ({}x{})", path, width, height);
        Ok(ImageFrame::from_rgba(width, height, rgba.into_raw()))
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        if let Ok(mut state) = self.state.lock() {
            state.cursor = 0;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
