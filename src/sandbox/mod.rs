//! Remote execution sandbox: session contract and provider adapters.
//!
//! A [`SandboxSession`] is a live remote execution context. It is owned by
//! exactly one logical flow; it is opened through a [`SandboxProvider`] and
//! released with [`SandboxSession::close`], which is idempotent. The
//! provider may expire a session on its own, so cleanup must tolerate a
//! handle that is already gone.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::execution::Language;

pub mod e2b;
pub mod manager;

pub use e2b::{E2bProvider, E2bSession};
pub use manager::SessionManager;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("could not create sandbox session: {0}")]
    SessionCreation(String),

    #[error("execution did not complete within {}ms", .0.as_millis())]
    ExecutionTimeout(Duration),

    #[error("{name}: {value}")]
    ExecutionFailed {
        name: String,
        value: String,
        traceback: String,
    },

    #[error("filesystem error at {path}: {reason}")]
    Filesystem { path: String, reason: String },

    #[error("sandbox transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("execution provider rejected the request: {0}")]
    Provider(String),

    #[error("missing credential {0}; the execution provider is unavailable")]
    MissingCredential(&'static str),

    #[error("sandbox session is closed")]
    Closed,
}

impl SandboxError {
    pub fn filesystem(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Filesystem { path: path.into(), reason: reason.to_string() }
    }

    /// Text handed back to the model when this error ends an attempt.
    pub fn error_context(&self) -> String {
        match self {
            Self::ExecutionFailed { name, value, traceback } if !traceback.is_empty() => {
                format!("{name}: {value}\n{traceback}")
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One piece of streamed output, in emission order within its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub text: String,
}

impl OutputChunk {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self { stream: StreamKind::Stdout, text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self { stream: StreamKind::Stderr, text: text.into() }
    }
}

/// Producer side of the output channel. Dropping it ends the stream.
pub type OutputSink = mpsc::UnboundedSender<OutputChunk>;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub language: Language,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: Option<String>,
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn open(&self) -> Result<Box<dyn SandboxSession>, SandboxError>;
}

#[async_trait]
pub trait SandboxSession: Send + Sync {
    fn id(&self) -> &str;

    /// Execute `code`, sending output chunks to `sink` as they arrive.
    ///
    /// An error raised by the executed code is reported as
    /// [`SandboxError::ExecutionFailed`]; transport problems use the other
    /// variants.
    async fn run(&self, code: &str, options: &RunOptions, sink: OutputSink) -> Result<(), SandboxError>;

    async fn list_files(&self, dir: &str) -> Result<Vec<FileMetadata>, SandboxError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError>;

    /// Release the remote context. Closing twice, or closing a session the
    /// provider already expired, is a no-op.
    async fn close(&mut self) -> Result<(), SandboxError>;
}

/// Close a session, logging instead of failing.
pub async fn close_quietly(session: &mut dyn SandboxSession) {
    let id = session.id().to_string();
    match session.close().await {
        Ok(()) => tracing::info!(session = %id, "sandbox session closed"),
        Err(e) => tracing::warn!(session = %id, error = %e, "failed to close sandbox session"),
    }
}
