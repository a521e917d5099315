use std::time::Duration;

use image::RgbImage;

/// A still frame sampled from a video.
///
/// `index` is the frame's position in the decoded stream, not its position
/// among the sampled frames.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub timestamp: Duration,
    pub pixels: RgbImage,
}

impl Frame {
    pub fn new(index: u64, timestamp: Duration, pixels: RgbImage) -> Self {
        Self {
            index,
            timestamp,
            pixels,
        }
    }

    /// Timestamp of decoded frame `index` at `frame_rate` frames per second.
    ///
    /// An unknown (zero or non-finite) frame rate yields a zero timestamp.
    pub fn timestamp_at(index: u64, frame_rate: f64) -> Duration {
        if frame_rate.is_finite() && frame_rate > 0.0 {
            Duration::from_secs_f64(index as f64 / frame_rate)
        } else {
            Duration::ZERO
        }
    }
}
