//! Natural-language prompt to source code.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    execution::Language,
    llm::{CompletionBackend, CompletionRequest, GenerationError},
};

pub mod conversation;
pub mod prompt;

pub use conversation::{Conversation, Turn};
pub use prompt::Workspace;

/// Input for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub natural_language_prompt: String,
    pub prior_error_context: Option<String>,
    /// Earlier exchanges of the same session, oldest first.
    pub history: Vec<Turn>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, prior_error_context: Option<String>) -> Self {
        Self { natural_language_prompt: prompt.into(), prior_error_context, history: Vec::new() }
    }

    pub fn with_history(mut self, history: &[Turn]) -> Self {
        self.history = history.to_vec();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub source_text: String,
    pub attempt_number: u32,
}

/// Seam the correction loop depends on.
#[async_trait::async_trait]
pub trait CodeSource: Send + Sync {
    async fn generate(&self, request: &GenerationRequest, attempt: u32) -> Result<GeneratedCode, GenerationError>;
}

pub struct CodeGenerator {
    backend: Arc<dyn CompletionBackend>,
    language: Language,
    workspace: Workspace,
    temperature: f32,
    max_tokens: u32,
}

impl fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeGenerator")
            .field("backend", &self.backend.name())
            .field("language", &self.language)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl CodeGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, language: Language) -> Self {
        Self {
            backend,
            language,
            workspace: Workspace::default(),
            temperature: 0.3,
            max_tokens: 4096,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_workspace(mut self, workspace: Workspace) -> Self {
        self.workspace = workspace;
        self
    }
}

#[async_trait::async_trait]
impl CodeSource for CodeGenerator {
    async fn generate(&self, request: &GenerationRequest, attempt: u32) -> Result<GeneratedCode, GenerationError> {
        let completion = CompletionRequest {
            system: prompt::system_instruction(self.language, &self.workspace),
            history: request.history.iter().flat_map(Turn::messages).collect(),
            user: prompt::user_prompt(
                &request.natural_language_prompt,
                request.prior_error_context.as_deref(),
            ),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        tracing::debug!(backend = self.backend.name(), attempt, "generating code");
        let raw = self.backend.complete(&completion).await?;
        let source_text = strip_code_fences(&raw, self.language);
        if source_text.is_empty() {
            return Err(GenerationError::MissingContent);
        }
        Ok(GeneratedCode { source_text, attempt_number: attempt })
    }
}

/// Remove fenced-block delimiters and stray backticks from model output.
///
/// When the reply holds fenced blocks only their bodies are kept; an
/// unpaired fence line is dropped.
pub fn strip_code_fences(raw: &str, language: Language) -> String {
    let text = raw.trim();
    let is_fence = |l: &str| l.trim_start().starts_with("```");
    let body = if text.lines().filter(|l| is_fence(l)).count() >= 2 {
        extract_blocks(text)
    } else {
        text.lines().filter(|l| !is_fence(l)).collect::<Vec<_>>().join("\n")
    };
    let body = body.trim().trim_matches('`').trim();

    // A bare language label left on the first line
    match body.split_once('\n') {
        Some((first, rest)) if language.fence_labels().contains(&first.trim()) => rest.trim().to_string(),
        _ if language.fence_labels().contains(&body) => String::new(),
        _ => body.to_string(),
    }
}

fn extract_blocks(text: &str) -> String {
    let mut blocks: Vec<&str> = Vec::new();
    let mut inside = false;
    for line in text.lines() {
        if line.trim().starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            blocks.push(line);
        }
    }
    blocks.join("\n")
}
