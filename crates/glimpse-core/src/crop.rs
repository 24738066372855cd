//! Face cropping from detected bounding boxes.

use crate::types::BoundingBox;
use image::{imageops, RgbImage};

/// Crop the region under `bbox`, clamped to the image bounds.
///
/// Detectors routinely return boxes that spill over the frame edge; the part
/// outside the frame is discarded. Returns `None` if nothing is left.
pub fn crop_face(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    if !(bbox.x.is_finite() && bbox.y.is_finite() && bbox.width.is_finite() && bbox.height.is_finite()) {
        return None;
    }

    let x0 = bbox.x.floor().clamp(0.0, width as f32) as u32;
    let y0 = bbox.y.floor().clamp(0.0, height as f32) as u32;
    let x1 = (bbox.x + bbox.width).ceil().clamp(0.0, width as f32) as u32;
    let y1 = (bbox.y + bbox.height).ceil().clamp(0.0, height as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
}
