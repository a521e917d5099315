//! Small value types shared across the workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Default sampling interval for video analysis, in decoded frames.
pub const DEFAULT_FRAME_INTERVAL: u32 = 30;

// ---------------------------------------------------------------------------
// Analysis type
// ---------------------------------------------------------------------------

/// Which diagnosis dimensions the reasoning step is asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Disease,
    Nutrient,
    #[default]
    Both,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Disease => "disease",
            AnalysisType::Nutrient => "nutrient",
            AnalysisType::Both => "both",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disease" => Ok(AnalysisType::Disease),
            "nutrient" => Ok(AnalysisType::Nutrient),
            "both" => Ok(AnalysisType::Both),
            other => Err(AnalysisError::InvalidParameter(format!(
                "unrecognized analysis type {other:?} (expected disease, nutrient or both)"
            ))),
        }
    }
}

/// Validate a caller-supplied frame interval.
pub fn validate_frame_interval(frame_interval: u32) -> Result<u32, AnalysisError> {
    if frame_interval < 1 {
        return Err(AnalysisError::InvalidParameter(
            "frame_interval must be a positive integer".to_string(),
        ));
    }
    Ok(frame_interval)
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// True when the box lies entirely inside a `width` x `height` raster.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Outcome of a single plant's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Error,
}

/// Aggregate outcome of an image or video analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Success,
    Partial,
    Error,
}
