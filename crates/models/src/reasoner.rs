//! Diagnosis reasoning.
//!
//! The reasoner owns prompt selection: the orchestrator hands it a caption
//! and an already-formatted affected percentage, and the reasoner renders the
//! template for the requested [`AnalysisType`].

use std::time::Duration;

use async_trait::async_trait;
use cropscan_core::error::Service;
use cropscan_core::prompt::{PromptSet, DEFAULT_SYSTEM_PROMPT};
use cropscan_core::types::AnalysisType;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::http;

/// Turns a caption and affected area into diagnosis text.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// `affected_percentage` is pre-formatted text such as `"12.5"`.
    async fn reason(
        &self,
        caption: &str,
        affected_percentage: &str,
        analysis_type: AnalysisType,
    ) -> Result<String, ModelError>;

    fn name(&self) -> &'static str;
}

/// Generation settings for [`OllamaReasoner`].
#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub system_prompt: String,
    pub prompts: PromptSet,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "gemma:2b".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            timeout: Duration::from_secs(120),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            prompts: PromptSet::default(),
        }
    }
}

/// Client for an Ollama `/api/generate` endpoint.
pub struct OllamaReasoner {
    client: reqwest::Client,
    settings: OllamaSettings,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaReasoner {
    pub fn new(settings: OllamaSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(client: reqwest::Client, settings: OllamaSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl Reasoner for OllamaReasoner {
    async fn reason(
        &self,
        caption: &str,
        affected_percentage: &str,
        analysis_type: AnalysisType,
    ) -> Result<String, ModelError> {
        let service = Service::Reasoning;
        let body = GenerateRequest {
            model: &self.settings.model,
            prompt: self
                .settings
                .prompts
                .render(analysis_type, caption, affected_percentage),
            system: &self.settings.system_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.settings.temperature,
                num_predict: self.settings.max_tokens,
            },
        };

        tracing::debug!(
            endpoint = %self.settings.endpoint,
            model = %self.settings.model,
            analysis_type = %analysis_type,
            "Requesting diagnosis",
        );

        let request = self
            .client
            .post(&self.settings.endpoint)
            .timeout(self.settings.timeout)
            .json(&body);
        let response = http::send(service, request).await?;
        let reply: GenerateResponse = http::parse_response(service, response).await?;

        let text = reply.response.trim();
        if text.is_empty() {
            return Err(ModelError::rejected(service, "model returned an empty response"));
        }
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
