//! Model-service configuration loaded from environment variables.
//!
//! | Variable                   | Default                                          |
//! |----------------------------|--------------------------------------------------|
//! | `SEGMENTER_BACKEND`        | `unet` (`unet` or `stub`)                        |
//! | `SEGMENTER_ENDPOINT`       | `http://localhost:8080/predictions/unet-plants`  |
//! | `SEGMENTER_TIMEOUT_SECS`   | `30`                                             |
//! | `CAPTIONER_BACKEND`        | `blip` (`blip` or `stub`)                        |
//! | `CAPTIONER_URL`            | `http://localhost:8000`                          |
//! | `CAPTIONER_TIMEOUT_SECS`   | `30`                                             |
//! | `CAPTIONER_DETAILED`       | `true`                                           |
//! | `REASONER_BACKEND`         | `ollama` (`ollama` or `stub`)                    |
//! | `REASONER_ENDPOINT`        | `http://localhost:11434/api/generate`            |
//! | `REASONER_MODEL`           | `gemma:2b`                                       |
//! | `REASONER_MAX_TOKENS`      | `1000`                                           |
//! | `REASONER_TEMPERATURE`     | `0.7`                                            |
//! | `REASONER_TIMEOUT_SECS`    | `120`                                            |
//! | `REASONER_SYSTEM_PROMPT`   | built-in agronomist prompt                       |
//! | `REASONER_PROMPT_TEMPLATE` | built-in, one per analysis type                  |
//! | `RETRY_INITIAL_DELAY_MS`   | `500`                                            |
//! | `RETRY_MAX_ATTEMPTS`       | `1` (at most 3)                                  |

use std::sync::Arc;
use std::time::Duration;

use cropscan_core::config::{env_opt, env_or, env_parse, parse_flag, ConfigError};
use cropscan_core::prompt::{PromptSet, PromptTemplate, DEFAULT_SYSTEM_PROMPT};

use crate::captioner::{BlipCaptioner, CaptionMode, Captioner};
use crate::reasoner::{OllamaReasoner, OllamaSettings, Reasoner};
use crate::retry::{RetryPolicy, MAX_RETRIES_LIMIT};
use crate::segmenter::{Segmenter, UnetSegmenter};
use crate::stub::{StubCaptioner, StubReasoner, StubSegmenter};

/// Whether a capability is served remotely or by the in-process stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Remote,
    Stub,
}

/// Parse a backend selector where `remote` names the HTTP implementation.
pub fn parse_backend(key: &'static str, raw: &str, remote: &str) -> Result<Backend, ConfigError> {
    let value = raw.trim().to_ascii_lowercase();
    if value == remote {
        Ok(Backend::Remote)
    } else if value == "stub" {
        Ok(Backend::Stub)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: format!("expected {remote} or stub"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub backend: Backend,
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptionerConfig {
    pub backend: Backend,
    pub url: String,
    pub timeout: Duration,
    pub mode: CaptionMode,
}

#[derive(Debug, Clone)]
pub struct ReasonerConfig {
    pub backend: Backend,
    pub settings: OllamaSettings,
}

/// Everything needed to construct the three model clients.
#[derive(Debug, Clone)]
pub struct ModelsConfig {
    pub segmenter: SegmenterConfig,
    pub captioner: CaptionerConfig,
    pub reasoner: ReasonerConfig,
    pub retry: RetryPolicy,
}

impl ModelsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let segmenter = SegmenterConfig {
            backend: parse_backend(
                "SEGMENTER_BACKEND",
                &env_or("SEGMENTER_BACKEND", "unet"),
                "unet",
            )?,
            endpoint: env_or(
                "SEGMENTER_ENDPOINT",
                "http://localhost:8080/predictions/unet-plants",
            ),
            timeout: Duration::from_secs(env_parse("SEGMENTER_TIMEOUT_SECS", 30u64)?),
        };

        let detailed = parse_flag("CAPTIONER_DETAILED", &env_or("CAPTIONER_DETAILED", "true"))?;
        let captioner = CaptionerConfig {
            backend: parse_backend(
                "CAPTIONER_BACKEND",
                &env_or("CAPTIONER_BACKEND", "blip"),
                "blip",
            )?,
            url: env_or("CAPTIONER_URL", "http://localhost:8000"),
            timeout: Duration::from_secs(env_parse("CAPTIONER_TIMEOUT_SECS", 30u64)?),
            mode: if detailed {
                CaptionMode::Detailed
            } else {
                CaptionMode::Basic
            },
        };

        let prompts = match env_opt("REASONER_PROMPT_TEMPLATE") {
            Some(template) => PromptSet::uniform(PromptTemplate::new(template)?),
            None => PromptSet::default(),
        };
        let defaults = OllamaSettings::default();
        let reasoner = ReasonerConfig {
            backend: parse_backend(
                "REASONER_BACKEND",
                &env_or("REASONER_BACKEND", "ollama"),
                "ollama",
            )?,
            settings: OllamaSettings {
                endpoint: env_or("REASONER_ENDPOINT", &defaults.endpoint),
                model: env_or("REASONER_MODEL", &defaults.model),
                max_tokens: env_parse("REASONER_MAX_TOKENS", defaults.max_tokens)?,
                temperature: env_parse("REASONER_TEMPERATURE", defaults.temperature)?,
                timeout: Duration::from_secs(env_parse("REASONER_TIMEOUT_SECS", 120u64)?),
                system_prompt: env_or("REASONER_SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
                prompts,
            },
        };

        let retry = RetryPolicy {
            max_retries: validate_retries(env_parse("RETRY_MAX_ATTEMPTS", 1u32)?)?,
            initial_delay: Duration::from_millis(env_parse("RETRY_INITIAL_DELAY_MS", 500u64)?),
            ..RetryPolicy::default()
        };

        Ok(Self {
            segmenter,
            captioner,
            reasoner,
            retry,
        })
    }

    /// A configuration with every capability served by the stubs.
    pub fn stubs() -> Self {
        Self {
            segmenter: SegmenterConfig {
                backend: Backend::Stub,
                endpoint: String::new(),
                timeout: Duration::from_secs(30),
            },
            captioner: CaptionerConfig {
                backend: Backend::Stub,
                url: String::new(),
                timeout: Duration::from_secs(30),
                mode: CaptionMode::Detailed,
            },
            reasoner: ReasonerConfig {
                backend: Backend::Stub,
                settings: OllamaSettings::default(),
            },
            retry: RetryPolicy::none(),
        }
    }

    /// Construct the configured clients. The HTTP ones share `client`.
    pub fn build(&self, client: &reqwest::Client) -> ModelClients {
        let segmenter: Arc<dyn Segmenter> = match self.segmenter.backend {
            Backend::Remote => Arc::new(UnetSegmenter::with_client(
                client.clone(),
                self.segmenter.endpoint.clone(),
                self.segmenter.timeout,
            )),
            Backend::Stub => Arc::new(StubSegmenter),
        };
        let captioner: Arc<dyn Captioner> = match self.captioner.backend {
            Backend::Remote => Arc::new(BlipCaptioner::with_client(
                client.clone(),
                self.captioner.url.clone(),
                self.captioner.mode,
                self.captioner.timeout,
            )),
            Backend::Stub => Arc::new(StubCaptioner),
        };
        let reasoner: Arc<dyn Reasoner> = match self.reasoner.backend {
            Backend::Remote => Arc::new(OllamaReasoner::with_client(
                client.clone(),
                self.reasoner.settings.clone(),
            )),
            Backend::Stub => Arc::new(StubReasoner),
        };

        tracing::info!(
            segmenter = segmenter.name(),
            captioner = captioner.name(),
            reasoner = reasoner.name(),
            "Model clients configured",
        );

        ModelClients {
            segmenter,
            captioner,
            reasoner,
        }
    }
}

fn validate_retries(max_retries: u32) -> Result<u32, ConfigError> {
    if max_retries > MAX_RETRIES_LIMIT {
        return Err(ConfigError::Invalid {
            key: "RETRY_MAX_ATTEMPTS",
            value: max_retries.to_string(),
            reason: format!("at most {MAX_RETRIES_LIMIT} retries are allowed"),
        });
    }
    Ok(max_retries)
}

/// The three capability clients an orchestrator is constructed with.
#[derive(Clone)]
pub struct ModelClients {
    pub segmenter: Arc<dyn Segmenter>,
    pub captioner: Arc<dyn Captioner>,
    pub reasoner: Arc<dyn Reasoner>,
}
