//! Clients for the external model services: segmentation, captioning and
//! reasoning.
//!
//! Each capability is an `async_trait` trait with an HTTP implementation and
//! an in-process stub, selected by [`config::ModelsConfig`].

pub mod captioner;
pub mod config;
pub mod error;
mod http;
pub mod reasoner;
pub mod retry;
pub mod segmenter;
pub mod stub;

pub use captioner::{BlipCaptioner, CaptionMode, Captioner};
pub use config::{ModelClients, ModelsConfig};
pub use error::ModelError;
pub use reasoner::{OllamaReasoner, OllamaSettings, Reasoner};
pub use retry::{retry_transient, RetryPolicy};
pub use segmenter::{Segmenter, UnetSegmenter};
pub use stub::{StubCaptioner, StubReasoner, StubSegmenter};
