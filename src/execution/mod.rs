//! One execution attempt: run code in a session, capture its output and
//! the files it produced, and classify the attempt.

use std::{collections::HashSet, fmt, path::Path, str::FromStr, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::sandbox::{FileMetadata, RunOptions, SandboxError, SandboxSession, StreamKind};

pub mod info;
pub mod observer;
pub mod preamble;

pub use info::{environment_info, EnvironmentInfo};
pub use observer::{ConsoleObserver, OutputObserver, SilentObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    R,
    Python,
}

impl Language {
    /// Tag understood by the execution provider.
    pub fn tag(self) -> &'static str {
        match self {
            Self::R => "r",
            Self::Python => "python",
        }
    }

    /// Labels a model may put after an opening code fence.
    pub fn fence_labels(self) -> &'static [&'static str] {
        match self {
            Self::R => &["r", "R", "{r}"],
            Self::Python => &["python", "py", "python3"],
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "r" => Some(Self::R),
            "py" => Some(Self::Python),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::R => f.write_str("R"),
            Self::Python => f.write_str("Python"),
        }
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "r" => Ok(Self::R),
            "python" | "py" => Ok(Self::Python),
            other => Err(anyhow::anyhow!("unsupported language: {other} (expected r|python)")),
        }
    }
}

/// Why an attempt was classified as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The executed code raised an error.
    Remote,
    /// The run completed but wrote to standard error.
    Stderr,
    /// The provider did not report completion in time.
    Timeout,
    /// Transport, filesystem or provider failure around the run.
    Boundary,
}

/// Immutable snapshot of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub created_file_paths: Vec<String>,
    pub failure_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
}

impl ExecutionResult {
    /// Error text for the next generation attempt: stderr, else the failure message.
    pub fn error_context(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.clone()
        } else {
            self.failure_message.clone().unwrap_or_default()
        }
    }

    pub fn timed_out(&self) -> bool {
        self.failure_kind == Some(FailureKind::Timeout)
    }

    pub(crate) fn failed(stdout: String, stderr: String, kind: FailureKind, message: String) -> Self {
        Self {
            succeeded: false,
            stdout,
            stderr,
            created_file_paths: Vec::new(),
            failure_message: Some(message),
            failure_kind: Some(kind),
        }
    }
}

/// Classification policy for a run that completed without a remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Treat any standard-error output as a failure, including output that
    /// is only whitespace.
    pub stderr_is_failure: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self { stderr_is_failure: true }
    }
}

pub struct ExecutionRunner {
    language: Language,
    output_dir: String,
    policy: FailurePolicy,
    install_preamble: bool,
    observer: Arc<dyn OutputObserver>,
}

impl fmt::Debug for ExecutionRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRunner")
            .field("language", &self.language)
            .field("output_dir", &self.output_dir)
            .field("policy", &self.policy)
            .field("install_preamble", &self.install_preamble)
            .finish_non_exhaustive()
    }
}

impl ExecutionRunner {
    pub fn new(language: Language, output_dir: impl Into<String>) -> Self {
        Self {
            language,
            output_dir: output_dir.into(),
            policy: FailurePolicy::default(),
            install_preamble: false,
            observer: Arc::new(SilentObserver),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_install_preamble(mut self, enabled: bool) -> Self {
        self.install_preamble = enabled;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn OutputObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn output_dir(&self) -> &str {
        &self.output_dir
    }

    /// Run `code` once. Every failure inside the attempt is folded into the
    /// returned result; nothing is propagated.
    pub async fn run_once(
        &self,
        session: &dyn SandboxSession,
        code: &str,
        timeout: Duration,
    ) -> ExecutionResult {
        let baseline = match session.list_files(&self.output_dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::debug!(error = %e, "could not list output directory before run");
                Vec::new()
            }
        };

        let source = if self.install_preamble {
            preamble::with_preamble(self.language, code)
        } else {
            code.to_string()
        };
        let options = RunOptions { language: self.language, timeout };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let run = async {
            match tokio::time::timeout(timeout, session.run(&source, &options, tx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SandboxError::ExecutionTimeout(timeout)),
            }
        };
        let drain = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            while let Some(chunk) = rx.recv().await {
                self.observer.on_chunk(&chunk);
                match chunk.stream {
                    StreamKind::Stdout => stdout.push_str(&chunk.text),
                    StreamKind::Stderr => stderr.push_str(&chunk.text),
                }
            }
            (stdout, stderr)
        };
        let (outcome, (stdout, stderr)) = tokio::join!(run, drain);

        if let Err(e) = outcome {
            let kind = match e {
                SandboxError::ExecutionFailed { .. } => FailureKind::Remote,
                SandboxError::ExecutionTimeout(_) => FailureKind::Timeout,
                _ => FailureKind::Boundary,
            };
            tracing::info!(session = session.id(), kind = ?kind, error = %e, "execution failed");
            let mut result = ExecutionResult::failed(stdout, stderr, kind, e.error_context());
            // Files left by a timed-out run are indeterminate
            if kind != FailureKind::Timeout {
                result.created_file_paths = self.created_since(session, &baseline).await.unwrap_or_default();
            }
            return result;
        }

        let created = match self.created_since(session, &baseline).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(error = %e, "listing produced files failed");
                return ExecutionResult::failed(stdout, stderr, FailureKind::Boundary, e.to_string());
            }
        };

        if self.policy.stderr_is_failure && !stderr.is_empty() {
            tracing::info!(session = session.id(), "execution wrote to standard error");
            let mut result = ExecutionResult::failed(
                stdout,
                stderr,
                FailureKind::Stderr,
                "execution wrote to standard error".into(),
            );
            result.created_file_paths = created;
            return result;
        }

        ExecutionResult {
            succeeded: true,
            stdout,
            stderr,
            created_file_paths: created,
            failure_message: None,
            failure_kind: None,
        }
    }

    /// Files in the output directory that are new or changed since `baseline`.
    async fn created_since(
        &self,
        session: &dyn SandboxSession,
        baseline: &[FileMetadata],
    ) -> Result<Vec<String>, SandboxError> {
        let before: HashSet<&FileMetadata> = baseline.iter().collect();
        let after = session.list_files(&self.output_dir).await?;
        Ok(after
            .into_iter()
            .filter(|f| !f.is_dir && !before.contains(f))
            .map(|f| f.path)
            .collect())
    }
}
