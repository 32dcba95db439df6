//! Language-model completion backends.
//!
//! Every provider is reached through [`CompletionBackend`]; request and
//! response shapes are adapted inside each adapter and nowhere else.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model endpoint unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model response is missing the generated text")]
    MissingContent,

    #[error("could not decode model response: {0}")]
    Decode(String),

    #[error("missing credential {0}; the provider is unavailable")]
    MissingCredential(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// One provider-neutral completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    /// Earlier user/assistant turns of the same conversation, oldest first.
    pub history: Vec<ChatMessage>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Provider name used in logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "gpt" => Ok(Self::OpenAi),
            other => Err(anyhow::anyhow!("unknown LLM provider: {other} (expected anthropic|openai)")),
        }
    }
}

/// Build the backend selected by `LLM_PROVIDER`.
///
/// Construction succeeds without credentials; the missing key surfaces as
/// [`GenerationError::MissingCredential`] on the first request.
pub fn backend_from_config(cfg: &Config) -> anyhow::Result<Arc<dyn CompletionBackend>> {
    let provider: Provider = cfg.get("LLM_PROVIDER").unwrap_or_else(|| "anthropic".into()).parse()?;
    let backend: Arc<dyn CompletionBackend> = match provider {
        Provider::Anthropic => Arc::new(AnthropicBackend::from_config(cfg)?),
        Provider::OpenAi => Arc::new(OpenAiBackend::from_config(cfg)?),
    };
    tracing::debug!(provider = backend.name(), "completion backend selected");
    Ok(backend)
}

/// Resolve `API_BASE_URL`, where `default` means the provider's own endpoint.
pub(crate) fn base_url(cfg: &Config, default: &str) -> String {
    let configured = cfg.get("API_BASE_URL").unwrap_or_else(|| "default".into());
    let base = if configured == "default" || configured.trim().is_empty() {
        default.to_string()
    } else {
        configured
    };
    base.trim_end_matches('/').trim_end_matches("/v1").to_string()
}
