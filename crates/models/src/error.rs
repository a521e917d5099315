use cropscan_core::error::{AnalysisError, Service};

/// Failure talking to an external model service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Connection, timeout or gateway failure. Worth one retry.
    #[error("{service} service unavailable: {message}")]
    Unavailable { service: Service, message: String },

    /// The service answered, but refused the request or replied with
    /// something unusable. Retrying would get the same answer.
    #[error("{service} service rejected the request: {message}")]
    Rejected { service: Service, message: String },
}

impl ModelError {
    pub fn unavailable(service: Service, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            message: message.into(),
        }
    }

    pub fn rejected(service: Service, message: impl Into<String>) -> Self {
        Self::Rejected {
            service,
            message: message.into(),
        }
    }

    pub fn service(&self) -> Service {
        match self {
            Self::Unavailable { service, .. } | Self::Rejected { service, .. } => *service,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Classify a transport-level [`reqwest::Error`].
    pub fn from_request(service: Service, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::unavailable(service, err.to_string())
        } else {
            Self::rejected(service, err.to_string())
        }
    }

    /// Classify a non-2xx HTTP status.
    pub fn from_status(service: Service, status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {}", truncate(body, 200));
        match status {
            502..=504 => Self::unavailable(service, message),
            _ => Self::rejected(service, message),
        }
    }
}

impl From<ModelError> for AnalysisError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unavailable { service, message } => {
                AnalysisError::UpstreamUnavailable { service, message }
            }
            ModelError::Rejected { service, message } => {
                AnalysisError::Upstream { service, message }
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
