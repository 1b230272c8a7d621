use std::path::Path;

use image::{codecs::jpeg::JpegEncoder, ColorType, DynamicImage, ImageBuffer, Rgba};
use sightline_types::{
    vision::{EncodedImage, ImageFrame},
    Result,
};
use tracing::debug;

use crate::capture_error;

/// Encode the frame as JPEG at its native resolution.
///
/// The frame is copied into an off-screen buffer; nothing else is touched.
pub fn encode_frame(frame: &ImageFrame, quality: u8) -> Result<EncodedImage> {
    if frame.width == 0 || frame.height == 0 {
        return Err(capture_error("frame has no pixels"));
    }
    let Some(buffer) =
        ImageBuffer::<Rgba<u8>, _>::from_raw(frame.width, frame.height, frame.data.clone())
    else {
        return Err(capture_error(format!(
            "pixel buffer of {} bytes does not fit a {}x{} RGBA surface",
            frame.data.len(),
            frame.width,
            frame.height
        )));
    };
    let rgb = DynamicImage::ImageRgba8(buffer).to_rgb8();

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode(rgb.as_raw(), frame.width, frame.height, ColorType::Rgb8)
        .map_err(|err| capture_error(format!("jpeg encoding failed: {err}")))?;
    debug!(
        "Encoded {}x{} frame into {} bytes",
        frame.width,
        frame.height,
        bytes.len()
    );
    Ok(EncodedImage::jpeg(frame.width, frame.height, bytes))
}

/// Decode a still image from disk into an RGBA frame.
pub fn load_image_file(path: &Path) -> Result<ImageFrame> {
    let img = image::open(path)
        .map_err(|err| capture_error(format!("failed to read image {}: {err}", path.display())))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(ImageFrame::from_rgba(width, height, rgba.into_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32) -> ImageFrame {
        ImageFrame::from_rgba(width, height, vec![200; (width * height * 4) as usize])
    }

    #[test]
    fn encodes_at_native_resolution() {
        let encoded = encode_frame(&solid_frame(640, 480), 80).expect("encode frame");
        assert_eq!((encoded.width, encoded.height), (640, 480));
        assert_eq!(encoded.mime, "image/jpeg");
        assert_eq!(&encoded.bytes[..2], &[0xff, 0xd8]);

        let decoded = image::load_from_memory(&encoded.bytes).expect("decode jpeg");
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let mut frame = solid_frame(4, 4);
        frame.data.truncate(10);
        let err = encode_frame(&frame, 80).unwrap_err();
        assert!(err.to_string().contains("does not fit"));
    }

    #[test]
    fn rejects_empty_frame() {
        assert!(encode_frame(&ImageFrame::empty(), 80).is_err());
    }
}
