//! Validation and decoding of caller-supplied still images.

use image::RgbImage;

use crate::error::AnalysisError;

/// Default upload limit for a single image (10 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Decode raw image bytes (PNG, JPEG or WebP) into an RGB raster.
///
/// Empty input, input over `max_bytes`, and undecodable bytes are all
/// rejected as [`AnalysisError::InvalidParameter`].
pub fn decode_image(bytes: &[u8], max_bytes: usize) -> Result<RgbImage, AnalysisError> {
    if bytes.is_empty() {
        return Err(AnalysisError::InvalidParameter(
            "image data is empty".to_string(),
        ));
    }
    if bytes.len() > max_bytes {
        return Err(AnalysisError::InvalidParameter(format!(
            "image is {} bytes, limit is {max_bytes}",
            bytes.len()
        )));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AnalysisError::InvalidParameter(format!("unreadable image: {e}")))?;
    let rgb = decoded.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(AnalysisError::InvalidParameter(
            "image has zero width or height".to_string(),
        ));
    }
    tracing::debug!(width = rgb.width(), height = rgb.height(), "Decoded input image");
    Ok(rgb)
}
