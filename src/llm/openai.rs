//! Reqwest-based OpenAI-compatible Chat Completions client (SSE streaming).

use std::pin::Pin;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use super::{ChatMessage, CompletionBackend, CompletionRequest, GenerationError, Role};
use crate::{config::Config, lines::LineBuffer};

const DEFAULT_BASE: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug)]
pub struct OpenAiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiBackend {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.request_timeout()).build()?;
        let api_key = cfg.get("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        let model = cfg.get("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        Ok(Self { http, base_url: super::base_url(cfg, DEFAULT_BASE), api_key, model })
    }

    fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, GenerationError>> + Send>> {
        let http = self.http.clone();
        let url = format!("{}/v1/chat/completions", self.base_url);
        let api_key = self.api_key.clone();
        let model = self.model.clone();

        Box::pin(try_stream! {
            let key = api_key.ok_or(GenerationError::MissingCredential("OPENAI_API_KEY"))?;

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
            let auth = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| GenerationError::Decode(e.to_string()))?;
            headers.insert(AUTHORIZATION, auth);

            let body = serde_json::json!({
                "model": model,
                "temperature": temperature,
                "messages": messages,
                "stream": true,
                "max_tokens": max_tokens,
            });

            let resp = http
                .post(url)
                .headers(headers)
                .json(&body)
                .send()
                .await
                .map_err(GenerationError::Unreachable)?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                Err::<(), _>(GenerationError::Status { status: status.as_u16(), body })?;
                return;
            }

            let mut lines = LineBuffer::default();
            let mut stream = resp.bytes_stream();

            while let Some(chunk) = stream.next().await {
                let bytes = chunk.map_err(GenerationError::Unreachable)?;
                lines.push(&bytes);
                while let Some(line) = lines.next_line() {
                    if let Some(event) = parse_sse_line(line.trim()) {
                        let done = matches!(event, StreamEvent::Done);
                        yield event;
                        if done { return; }
                    }
                }
            }
            if let Some(event) = lines.finish().and_then(|l| parse_sse_line(l.trim())) {
                yield event;
            }
            yield StreamEvent::Done;
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(ChatMessage::new(Role::System, request.system.clone()));
        messages.extend(request.history.iter().cloned());
        messages.push(ChatMessage::new(Role::User, request.user.clone()));
        tracing::debug!(model = %self.model, "requesting chat completion");

        let mut stream = self.chat_stream(messages, request.temperature, request.max_tokens);
        let mut text = String::new();
        while let Some(ev) = stream.next().await {
            match ev? {
                StreamEvent::Content(t) => text.push_str(&t),
                StreamEvent::Done => break,
            }
        }
        if text.trim().is_empty() {
            return Err(GenerationError::MissingContent);
        }
        Ok(text)
    }
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Content(String),
    Done,
}

fn parse_sse_line(line: &str) -> Option<StreamEvent> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(StreamEvent::Done);
    }
    // Malformed lines are ignored
    let chunk = serde_json::from_str::<Chunk>(payload).ok()?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();
    if content.is_empty() {
        None
    } else {
        Some(StreamEvent::Content(content))
    }
}

// Minimal chunk structures for OpenAI-like streaming
#[derive(Debug, Deserialize)]
struct Chunk {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{serve_once, Reply};

    #[test]
    fn sse_lines_yield_content_and_done() {
        let line = r#"data: {"choices":[{"delta":{"content":"x <- 1"}}]}"#;
        assert_eq!(parse_sse_line(line), Some(StreamEvent::Content("x <- 1".into())));
        assert_eq!(parse_sse_line("data: [DONE]"), Some(StreamEvent::Done));
    }

    #[test]
    fn sse_noise_is_skipped() {
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("data: {not json"), None);
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#), None);
        assert_eq!(parse_sse_line("event: ping"), None);
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "s".into(),
            history: Vec::new(),
            user: "u".into(),
            temperature: 0.0,
            max_tokens: 16,
        }
    }

    fn backend_at(base: &str) -> OpenAiBackend {
        let cfg = Config::from_pairs([("API_BASE_URL", base), ("OPENAI_API_KEY", "sk-test")]);
        OpenAiBackend::from_config(&cfg).unwrap()
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let cfg = Config::from_pairs([("API_BASE_URL", "http://127.0.0.1:9")]);
        let backend = OpenAiBackend::from_config(&cfg).unwrap();
        let err = backend.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingCredential("OPENAI_API_KEY")));
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let base = serve_once(Reply::new(
            429,
            "application/json",
            vec![br#"{"error":"rate limited"}"#.to_vec()],
        ))
        .await;
        let err = backend_at(&base).complete(&request()).await.unwrap_err();
        match err {
            GenerationError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("rate limited"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streamed_deltas_survive_split_characters() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"cat(‘ok’)\"}}]}\n\n".as_bytes();
        let cut = event.iter().position(|b| *b == 0xE2).unwrap() + 2;
        let base = serve_once(Reply::new(
            200,
            "text/event-stream",
            vec![event[..cut].to_vec(), event[cut..].to_vec(), b"data: [DONE]\n\n".to_vec()],
        ))
        .await;
        let text = backend_at(&base).complete(&request()).await.unwrap();
        assert_eq!(text, "cat(‘ok’)");
    }

    #[tokio::test]
    async fn stream_cut_before_any_content_is_an_error() {
        let base = serve_once(Reply::new(200, "text/event-stream", vec![b": ping\n".to_vec()]).truncated()).await;
        let err = backend_at(&base).complete(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unreachable(_) | GenerationError::MissingContent));
    }
}
