use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, SightlineError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    /// Raw RGBA pixel buffer.
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl ImageFrame {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
            captured_at: Utc::now(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Compressed image ready to ship to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn jpeg(width: u32, height: u32, bytes: Vec<u8>) -> Self {
        Self {
            width,
            height,
            mime: "image/jpeg",
            bytes,
        }
    }

    /// Plain base64 without a `data:` prefix.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

}

/// Image bytes the backend sent back as base64, optionally as a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    /// File extension matching the content.
    pub extension: &'static str,
}

impl ImagePayload {
    pub fn decode(payload: &str) -> Result<Self> {
        let data = match payload.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => payload,
        };
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|err| SightlineError::Decode(format!("image payload is not base64: {err}")))?;
        if bytes.is_empty() {
            return Err(SightlineError::Decode("image payload is empty".into()));
        }
        let extension = match bytes.as_slice() {
            [0xff, 0xd8, ..] => "jpg",
            [0x89, b'P', b'N', b'G', ..] => "png",
            _ => "bin",
        };
        Ok(Self { bytes, extension })
    }
}
