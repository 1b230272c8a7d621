//! Bounding-box overlay: scales detections into overlay space and keeps the
//! resulting shapes on a surface that can be rasterised on demand.

mod glyphs;
mod raster;

use sightline_types::{
    detection::DetectionBatch, geometry::BoundingBox, Result, SightlineError,
};
use tracing::trace;

pub use raster::{BOX_COLOR, STROKE_WIDTH, TEXT_COLOR};

pub const TAG_HEIGHT: f32 = 20.0;
/// Glyph cell plus spacing.
pub(crate) const TAG_CHAR_WIDTH: f32 = 7.0;
pub(crate) const TAG_PADDING: f32 = 4.0;

/// Filled label tag drawn next to a box.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTag {
    pub text: String,
    pub area: BoundingBox,
}

/// One detection as it appears on the overlay, already in overlay pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayShape {
    pub rect: BoundingBox,
    pub tag: LabelTag,
}

/// Drawing surface placed over the video.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverlaySurface {
    width: u32,
    height: u32,
    shapes: Vec<OverlayShape>,
}

impl OverlaySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            shapes: Vec::new(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn shapes(&self) -> &[OverlayShape] {
        &self.shapes
    }

    pub fn is_clear(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Owns the overlay surface and redraws it from detection batches.
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    surface: OverlaySurface,
}

impl OverlayRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: OverlaySurface::new(width, height),
        }
    }

    pub fn surface(&self) -> &OverlaySurface {
        &self.surface
    }

    /// Change the backing resolution. Resizing always clears.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface = OverlaySurface::new(width, height);
    }

    pub fn clear(&mut self) {
        self.surface.shapes.clear();
    }

    /// Replace the overlay with `batch`.
    ///
    /// Boxes are in the coordinate space of `batch.source_size`; when that is
    /// unknown the batch is assumed to share the overlay resolution.
    pub fn render(&mut self, batch: &DetectionBatch) -> Result<()> {
        let source = batch.source_size.unwrap_or(self.surface.size());
        self.render_from(batch, source)
    }

    /// Replace the overlay with `batch`, whose boxes are in `source` pixels.
    pub fn render_from(&mut self, batch: &DetectionBatch, source: (u32, u32)) -> Result<()> {
        let (width, height) = self.surface.size();
        if width == 0 || height == 0 {
            return Err(overlay_error("overlay has no size"));
        }
        if source.0 == 0 || source.1 == 0 {
            return Err(overlay_error(format!(
                "source size {}x{} cannot be scaled",
                source.0, source.1
            )));
        }
        let sx = width as f32 / source.0 as f32;
        let sy = height as f32 / source.1 as f32;

        let shapes = batch
            .iter()
            .map(|detection| {
                let rect = detection.bbox.scale(sx, sy);
                let text = detection.tag_text();
                let tag = LabelTag {
                    area: tag_area(&rect, &text),
                    text,
                };
                OverlayShape { rect, tag }
            })
            .collect();
        self.surface.shapes = shapes;
        trace!(
            "Overlay redrawn with {} shapes (scale {:.3}x{:.3})",
            self.surface.shapes.len(),
            sx,
            sy
        );
        Ok(())
    }
}

/// Tag sits on top of the box, or just inside it when the box touches the top edge.
fn tag_area(rect: &BoundingBox, text: &str) -> BoundingBox {
    let width = text.chars().count() as f32 * TAG_CHAR_WIDTH + 2.0 * TAG_PADDING;
    let y = if rect.y >= TAG_HEIGHT {
        rect.y - TAG_HEIGHT
    } else {
        rect.y
    };
    BoundingBox::from_xywh(rect.x, y, width, TAG_HEIGHT)
}

pub fn overlay_error(message: impl Into<String>) -> SightlineError {
    SightlineError::Overlay(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_types::detection::Detection;

    fn bottle() -> Detection {
        Detection::new("bottle", 0.91, BoundingBox::from_xywh(50.0, 60.0, 40.0, 120.0))
    }

    #[test]
    fn one_to_one_render_matches_source_box() {
        let mut renderer = OverlayRenderer::new(640, 480);
        let batch = DetectionBatch::new(vec![bottle()]).with_source_size(640, 480);
        renderer.render(&batch).expect("render");

        let shapes = renderer.surface().shapes();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].rect, BoundingBox::from_xywh(50.0, 60.0, 40.0, 120.0));
        assert_eq!(shapes[0].tag.text, "bottle 91.0%");
        assert_eq!(shapes[0].tag.area.y, 40.0);
    }

    #[test]
    fn scales_each_axis_independently() {
        let mut renderer = OverlayRenderer::new(320, 960);
        let batch = DetectionBatch::new(vec![bottle(), Detection::new(
            "cup",
            0.4,
            BoundingBox::from_xywh(0.0, 0.0, 640.0, 480.0),
        )])
        .with_source_size(640, 480);
        renderer.render(&batch).expect("render");

        let (sx, sy) = (320.0 / 640.0, 960.0 / 480.0);
        for (shape, detection) in renderer.surface().shapes().iter().zip(batch.iter()) {
            assert_eq!(shape.rect.x, detection.bbox.x * sx);
            assert_eq!(shape.rect.y, detection.bbox.y * sy);
            assert_eq!(shape.rect.width, detection.bbox.width * sx);
            assert_eq!(shape.rect.height, detection.bbox.height * sy);
        }
    }

    #[test]
    fn render_replaces_previous_content() {
        let mut renderer = OverlayRenderer::new(640, 480);
        renderer
            .render(&DetectionBatch::new(vec![bottle(), bottle()]))
            .expect("first render");
        assert_eq!(renderer.surface().shapes().len(), 2);

        renderer.render(&DetectionBatch::empty()).expect("empty render");
        assert!(renderer.surface().is_clear());
    }

    #[test]
    fn tag_moves_inside_box_at_top_edge() {
        let mut renderer = OverlayRenderer::new(100, 100);
        renderer
            .render(&DetectionBatch::new(vec![Detection::new(
                "cat",
                0.5,
                BoundingBox::from_xywh(5.0, 2.0, 50.0, 50.0),
            )]))
            .expect("render");
        assert_eq!(renderer.surface().shapes()[0].tag.area.y, 2.0);
    }

    #[test]
    fn zero_sized_source_is_rejected() {
        let mut renderer = OverlayRenderer::new(100, 100);
        assert!(renderer
            .render_from(&DetectionBatch::new(vec![bottle()]), (0, 480))
            .is_err());
        let mut unsized_renderer = OverlayRenderer::default();
        assert!(unsized_renderer.render(&DetectionBatch::empty()).is_err());
    }

    #[test]
    fn resize_clears_surface() {
        let mut renderer = OverlayRenderer::new(640, 480);
        renderer
            .render(&DetectionBatch::new(vec![bottle()]))
            .expect("render");
        renderer.resize(1280, 720);
        assert!(renderer.surface().is_clear());
        assert_eq!(renderer.surface().size(), (1280, 720));
    }
}
