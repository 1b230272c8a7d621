use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use sightline_types::{vision::ImageFrame, Result};
use tracing::info;

use crate::{camera_access_error, Camera};

/// Generated test pattern used for demos and tests.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    deny_access: bool,
    open: AtomicBool,
    frames: AtomicU64,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            deny_access: false,
            open: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        }
    }

    /// A camera whose acquisition always fails, as if permission was refused.
    pub fn denied() -> Self {
        Self {
            deny_access: true,
            ..Self::new(640, 480)
        }
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let band = (index * 16) % u64::from(self.width.max(1));
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let in_band = u64::from(x).abs_diff(band) < 8;
                let shade = ((x + y) % 256) as u8;
                if in_band {
                    data.extend_from_slice(&[255, 255, 255, 255]);
                } else {
                    data.extend_from_slice(&[shade, shade / 2, 96, 255]);
                }
            }
        }
        data
    }
}

#[async_trait]
impl Camera for SyntheticCamera {
    async fn open(&self) -> Result<(u32, u32)> {
        if self.deny_access {
            return Err(camera_access_error("permission denied"));
        }
        self.open.store(true, Ordering::SeqCst);
        info!("Synthetic camera opened at {}x{}", self.width, self.height);
        Ok((self.width, self.height))
    }

    async fn capture_frame(&self) -> Result<ImageFrame> {
        if !self.is_open() {
            return Err(camera_access_error("camera is not open"));
        }
        let index = self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(ImageFrame::from_rgba(
            self.width,
            self.height,
            self.render(index),
        ))
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        info!("Synthetic camera closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
