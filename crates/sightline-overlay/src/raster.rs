use image::{Rgba, RgbaImage};
use sightline_types::geometry::BoundingBox;

use crate::{
    glyphs::{lit_pixels, GLYPH_HEIGHT},
    LabelTag, OverlaySurface, TAG_CHAR_WIDTH, TAG_HEIGHT, TAG_PADDING,
};

pub const BOX_COLOR: Rgba<u8> = Rgba([0xff, 0x44, 0x44, 0xff]);
pub const TEXT_COLOR: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);
pub const STROKE_WIDTH: u32 = 2;

/// Convert a float box to inclusive pixel bounds clipped to the image.
fn pixel_bounds(bbox: &BoundingBox, dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 {
        return None;
    }
    let x0 = bbox.x.floor().max(0.0);
    let y0 = bbox.y.floor().max(0.0);
    let x1 = (bbox.x2().ceil() - 1.0).min(w as f32 - 1.0);
    let y1 = (bbox.y2().ceil() - 1.0).min(h as f32 - 1.0);
    if x0 > x1 || y0 > y1 || x0 >= w as f32 || y0 >= h as f32 {
        return None;
    }
    Some([x0 as u32, y0 as u32, x1 as u32, y1 as u32])
}

fn stroke_rect(img: &mut RgbaImage, bbox: &BoundingBox, color: Rgba<u8>, thickness: u32) {
    let Some([x0, y0, x1, y1]) = pixel_bounds(bbox, img.dimensions()) else {
        return;
    };
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

fn fill_rect(img: &mut RgbaImage, bbox: &BoundingBox, color: Rgba<u8>) {
    let Some([x0, y0, x1, y1]) = pixel_bounds(bbox, img.dimensions()) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            img.put_pixel(x, y, color);
        }
    }
}

fn draw_text(img: &mut RgbaImage, tag: &LabelTag, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    let top = tag.area.y.floor() + ((TAG_HEIGHT - GLYPH_HEIGHT as f32) / 2.0).floor();
    for (index, ch) in tag.text.chars().enumerate() {
        let left = tag.area.x.floor() + TAG_PADDING + index as f32 * TAG_CHAR_WIDTH;
        if left >= w as f32 {
            break;
        }
        for (col, row) in lit_pixels(ch) {
            let x = left + col as f32;
            let y = top + row as f32;
            if x >= 0.0 && y >= 0.0 && x < w as f32 && y < h as f32 {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

impl OverlaySurface {
    /// Transparent image of the overlay at its backing resolution.
    pub fn rasterize(&self) -> RgbaImage {
        let mut img = RgbaImage::new(self.width, self.height);
        self.draw_into(&mut img);
        img
    }

    /// Burn the overlay into `frame`. The frame must share the overlay size.
    pub fn composite_onto(&self, frame: &mut RgbaImage) -> crate::Result<()> {
        if frame.dimensions() != self.size() {
            return Err(crate::overlay_error(format!(
                "frame is {}x{} but overlay is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        self.draw_into(frame);
        Ok(())
    }

    fn draw_into(&self, img: &mut RgbaImage) {
        for shape in &self.shapes {
            stroke_rect(img, &shape.rect, BOX_COLOR, STROKE_WIDTH);
            fill_rect(img, &shape.tag.area, BOX_COLOR);
            draw_text(img, &shape.tag, TEXT_COLOR);
        }
    }
}
