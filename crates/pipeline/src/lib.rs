//! Crop-health analysis pipeline.
//!
//! Frame extraction, per-image orchestration (segmentation, then caption and
//! reasoning per plant) and per-video orchestration with a bounded frame
//! worker pool, deadline and cancellation.

pub mod config;
pub mod frames;
pub mod image_analyzer;
pub mod segmentation;
pub mod video_analyzer;

pub use config::PipelineConfig;
pub use frames::{FfmpegDecoder, FfmpegTools, FrameDecoder, FrameExtractor};
pub use image_analyzer::ImageAnalyzer;
pub use video_analyzer::{TimeoutPolicy, VideoAnalyzer, VideoRequest};
