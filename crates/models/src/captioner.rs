//! Plant captioning.

use std::time::Duration;

use async_trait::async_trait;
use cropscan_core::error::Service;
use image::{ImageFormat, RgbImage};
use serde::Deserialize;

use crate::error::ModelError;
use crate::http;

/// Describes a cropped plant in natural language.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, crop: &RgbImage) -> Result<String, ModelError>;

    fn name(&self) -> &'static str;
}

/// Which BLIP endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionMode {
    /// `POST /analyze`, answers with `detailed_description`.
    Detailed,
    /// `POST /caption`, answers with `caption`.
    Basic,
}

impl CaptionMode {
    fn path(self) -> &'static str {
        match self {
            CaptionMode::Detailed => "analyze",
            CaptionMode::Basic => "caption",
        }
    }
}

/// HTTP client for a BLIP captioning container.
pub struct BlipCaptioner {
    client: reqwest::Client,
    base_url: String,
    mode: CaptionMode,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    detailed_description: Option<String>,
}

impl BlipCaptioner {
    pub fn new(base_url: String, mode: CaptionMode, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, mode, timeout)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        mode: CaptionMode,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
            timeout,
        }
    }

    fn url(&self) -> String {
        format!("{}/{}", self.base_url, self.mode.path())
    }
}

#[async_trait]
impl Captioner for BlipCaptioner {
    async fn caption(&self, crop: &RgbImage) -> Result<String, ModelError> {
        let service = Service::Captioning;
        let form = http::image_form(service, "file", crop, ImageFormat::Jpeg)?;
        let url = self.url();

        tracing::debug!(url = %url, mode = ?self.mode, "Requesting caption");

        let request = self.client.post(&url).timeout(self.timeout).multipart(form);
        let response = http::send(service, request).await?;
        let body: CaptionResponse = http::parse_response(service, response).await?;

        let text = match self.mode {
            CaptionMode::Detailed => body.detailed_description.or(body.caption),
            CaptionMode::Basic => body.caption,
        };
        match text.map(|t| t.trim().to_string()) {
            Some(caption) if !caption.is_empty() => Ok(caption),
            _ => Err(ModelError::rejected(service, "response carried no caption")),
        }
    }

    fn name(&self) -> &'static str {
        "blip"
    }
}
