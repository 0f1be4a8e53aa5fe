//! Image preparation before inference.
//!
//! Inputs are classified with the ordered format probes, decoded, flattened
//! to RGB and downscaled so the long side is at most `sqrt(max_pixels)`. The
//! result is always PNG so the backend sees one format.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use renamer_core::format::{self, ImageKind};

use crate::suggester::SuggestError;

/// Pixel budget per image sent to the model.
pub const DEFAULT_MAX_PIXELS: u32 = 786_432;

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub png: Vec<u8>,
    /// Format of the original bytes.
    pub source_kind: ImageKind,
    pub width: u32,
    pub height: u32,
}

/// Longest side allowed for a `max_pixels` budget.
pub fn target_long_side(max_pixels: u32) -> u32 {
    (f64::from(max_pixels).sqrt() as u32).max(1)
}

/// Output dimensions for an image of `width` x `height`. Aspect ratio is kept
/// and neither side drops below one pixel.
pub fn scaled_dimensions(width: u32, height: u32, max_pixels: u32) -> (u32, u32) {
    let long = width.max(height);
    let target = target_long_side(max_pixels);
    if long <= target {
        return (width, height);
    }
    let scale = |side: u32| ((u64::from(side) * u64::from(target) / u64::from(long)) as u32).max(1);
    (scale(width), scale(height))
}

/// Probe, decode, downscale and re-encode. CPU bound.
pub fn prepare_blocking(bytes: &[u8], max_pixels: u32) -> Result<PreparedImage, SuggestError> {
    let source_kind =
        format::detect(bytes).map_err(|e| SuggestError::UnsupportedFormat(e.to_string()))?;

    let decoded = image::load_from_memory_with_format(bytes, source_kind.image_format())
        .map_err(|e| SuggestError::UnsupportedFormat(format!("{source_kind:?} decode failed: {e}")))?;

    let (width, height) = scaled_dimensions(decoded.width(), decoded.height(), max_pixels);
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle)
    };

    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut png = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| SuggestError::Backend(format!("PNG encode failed: {e}")))?;

    Ok(PreparedImage {
        png,
        source_kind,
        width,
        height,
    })
}

/// [`prepare_blocking`] on the blocking thread pool.
pub async fn prepare(bytes: Vec<u8>, max_pixels: u32) -> Result<PreparedImage, SuggestError> {
    tokio::task::spawn_blocking(move || prepare_blocking(&bytes, max_pixels))
        .await
        .map_err(|e| SuggestError::Backend(format!("preprocessing task failed: {e}")))?
}
