//! Anthropic Messages API adapter.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChatMessage, CompletionBackend, CompletionRequest, GenerationError, Role};
use crate::config::Config;

const DEFAULT_BASE: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl AnthropicBackend {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.request_timeout()).build()?;
        let api_key = cfg.get("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty());
        let model = cfg.get("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        Ok(Self { http, base_url: super::base_url(cfg, DEFAULT_BASE), api_key, model })
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingCredential("ANTHROPIC_API_KEY"))?;

        let mut messages = request.history.clone();
        messages.push(ChatMessage::new(Role::User, request.user.clone()));
        let body = serde_json::json!({
            "model": self.model,
            "system": request.system,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        tracing::debug!(model = %self.model, "requesting message completion");

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::Unreachable)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status: status.as_u16(), body });
        }
        let text = resp.text().await.map_err(GenerationError::Unreachable)?;
        extract_text(&text)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn extract_text(raw: &str) -> Result<String, GenerationError> {
    let parsed: MessagesResponse =
        serde_json::from_str(raw).map_err(|e| GenerationError::Decode(e.to_string()))?;
    let text: String = parsed
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect();
    if text.trim().is_empty() {
        Err(GenerationError::MissingContent)
    } else {
        Ok(text)
    }
}
