//! Image normalization: a pure transform with no external calls.

use std::io::Cursor;

use image::imageops::FilterType;

use crate::core::error::{PipelineError, Result};

/// Longest side of a published image.
pub const MAX_DIMENSION: u32 = 1024;

/// Decode provider output, bound it to [`MAX_DIMENSION`] preserving aspect
/// ratio, and re-encode as JPEG.
pub fn normalize(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::ImageGeneration(format!("cannot decode image: {}", e)))?;

    let bounded = if decoded.width() > MAX_DIMENSION || decoded.height() > MAX_DIMENSION {
        decoded.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Lanczos3)
    } else {
        decoded
    };

    let mut out = Vec::new();
    bounded
        .to_rgb8()
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .map_err(|e| PipelineError::ImageGeneration(format!("cannot encode image: {}", e)))?;
    Ok(out)
}
