//! Face crop extraction from detector boxes.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;

/// Side length of the square face crops handed to the extractor.
pub const CROP_SIZE: u32 = 160;

/// Cut `bbox` out of `image` (clamped to the image bounds) and resize it to
/// `CROP_SIZE`×`CROP_SIZE`. Returns `None` if nothing of the box lies inside
/// the image.
pub fn crop_face(image: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let (width, height) = image.dimensions();
    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).min(width as f32)).ceil().max(0.0) as u32;
    let y1 = ((bbox.y + bbox.height).min(height as f32)).ceil().max(0.0) as u32;

    if x0 >= x1 || y0 >= y1 || x0 >= width || y0 >= height {
        return None;
    }

    let face = image.crop_imm(x0, y0, x1 - x0, y1 - y0);
    Some(face.resize_exact(CROP_SIZE, CROP_SIZE, FilterType::Triangle))
}

/// Encode a crop as PNG for the sample store.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
