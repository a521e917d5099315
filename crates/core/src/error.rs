use std::fmt;

use serde::{Deserialize, Serialize};

/// The external model service a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Segmentation,
    Captioning,
    Reasoning,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Segmentation => "segmentation",
            Service::Captioning => "captioning",
            Service::Reasoning => "reasoning",
        };
        f.write_str(name)
    }
}

/// Failure taxonomy shared by every stage of the analysis pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    /// Bad caller input, rejected before any work starts.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The video stream could not be read or decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Transient connection or timeout failure talking to a model service.
    #[error("{service} service unavailable: {message}")]
    UpstreamUnavailable { service: Service, message: String },

    /// The model service answered but rejected the request or replied with garbage.
    #[error("{service} service error: {message}")]
    Upstream { service: Service, message: String },

    /// A pipeline invariant was violated. Never recovered.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Stable machine-readable code, used in serialized failure records.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::InvalidParameter(_) => "invalid_parameter",
            AnalysisError::Decode(_) => "decode_error",
            AnalysisError::UpstreamUnavailable { .. } => "upstream_unavailable",
            AnalysisError::Upstream { .. } => "upstream_error",
            AnalysisError::Internal(_) => "internal_error",
        }
    }

    /// Upstream failures are isolated to the frame or plant that hit them.
    pub fn is_recoverable_per_frame(&self) -> bool {
        matches!(
            self,
            AnalysisError::UpstreamUnavailable { .. } | AnalysisError::Upstream { .. }
        )
    }

    /// Only transient failures are worth a retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::UpstreamUnavailable { .. })
    }
}
