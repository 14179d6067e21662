//! Image preparation for embedding and prompting.
//!
//! Decodes raster images, downscales anything larger than the configured
//! maximum dimension (aspect ratio preserved) and re-encodes to PNG, the one
//! format both the embedding adapter and the vision prompt consume.

use anyhow::{Context, Result};
use image::{GenericImageView, ImageFormat};

/// A decoded, size-capped, PNG-encoded image.
#[derive(Debug)]
pub struct PreparedImage {
    /// PNG-encoded pixel data
    pub png: Vec<u8>,
    /// Dimensions after any downscaling (width, height)
    pub dimensions: (u32, u32),
    /// Dimensions as found in the document (width, height)
    pub original_dimensions: (u32, u32),
    pub was_resized: bool,
}

/// Decode raw image bytes, downscale to `max_dimension` if needed and
/// re-encode as PNG.
pub fn prepare_image(data: &[u8], max_dimension: u32) -> Result<PreparedImage> {
    let img = image::load_from_memory(data).context("failed to decode image")?;

    let (orig_w, orig_h) = img.dimensions();

    let (new_w, new_h, was_resized) = if orig_w > max_dimension || orig_h > max_dimension {
        let scale = (max_dimension as f64) / (orig_w.max(orig_h) as f64);
        let new_w = ((orig_w as f64) * scale).round() as u32;
        let new_h = ((orig_h as f64) * scale).round() as u32;
        (new_w.max(1), new_h.max(1), true)
    } else {
        (orig_w, orig_h, false)
    };

    let processed = if was_resized {
        img.resize(new_w, new_h, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let rgb = processed.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut png = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut png);
    rgb.write_to(&mut cursor, ImageFormat::Png)
        .context("failed to encode image as PNG")?;

    Ok(PreparedImage {
        png,
        dimensions: (width, height),
        original_dimensions: (orig_w, orig_h),
        was_resized,
    })
}
