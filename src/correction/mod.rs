//! The generate, execute, diagnose, retry loop.
//!
//! Correction is purely textual: a failed attempt's captured error text is
//! handed back to the model verbatim and nothing else about the failure is
//! inspected. Convergence is not guaranteed, hence the attempt budget.

use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    execution::{ExecutionResult, ExecutionRunner, FailureKind},
    generator::{CodeSource, GeneratedCode, GenerationRequest, Turn},
    llm::GenerationError,
    sandbox::{SandboxError, SessionManager},
};

mod state;

pub use state::{CorrectionState, Phase, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("code generation failed on attempt {attempt}: {source}")]
    Generation {
        attempt: u32,
        #[source]
        source: GenerationError,
        last: LastAttempt,
    },

    #[error("sandbox unavailable on attempt {attempt}: {source}")]
    Session {
        attempt: u32,
        #[source]
        source: SandboxError,
        last: LastAttempt,
    },
}

impl LoopError {
    /// The attempt that was in progress when the loop stopped.
    pub fn attempt(&self) -> u32 {
        match self {
            Self::Generation { attempt, .. } | Self::Session { attempt, .. } => *attempt,
        }
    }

    /// Newest code and execution result produced before the loop stopped.
    pub fn last(&self) -> &LastAttempt {
        match self {
            Self::Generation { last, .. } | Self::Session { last, .. } => last,
        }
    }
}

/// Progress made before a loop was cut short. The code may be newer than
/// the result when generation succeeded but no session could run it.
#[derive(Debug, Clone, Default)]
pub struct LastAttempt {
    pub code: Option<GeneratedCode>,
    pub result: Option<ExecutionResult>,
}

/// Terminal result of one request.
#[derive(Debug, Clone)]
pub enum CorrectionOutcome {
    Succeeded { code: GeneratedCode, result: ExecutionResult },
    Exhausted { code: GeneratedCode, result: ExecutionResult },
}

impl CorrectionOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        self.code().attempt_number
    }

    /// The code of the final attempt.
    pub fn code(&self) -> &GeneratedCode {
        match self {
            Self::Succeeded { code, .. } | Self::Exhausted { code, .. } => code,
        }
    }

    pub fn result(&self) -> &ExecutionResult {
        match self {
            Self::Succeeded { result, .. } | Self::Exhausted { result, .. } => result,
        }
    }
}

/// Hooks for watching a loop make progress.
pub trait AttemptListener: Send + Sync {
    fn on_generated(&self, _code: &GeneratedCode) {}

    fn on_result(&self, _attempt: u32, _result: &ExecutionResult) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl AttemptListener for NoopListener {}

pub struct CorrectionLoop {
    generator: Arc<dyn CodeSource>,
    runner: ExecutionRunner,
    max_attempts: u32,
    timeout: Duration,
    listener: Arc<dyn AttemptListener>,
}

impl fmt::Debug for CorrectionLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrectionLoop")
            .field("runner", &self.runner)
            .field("max_attempts", &self.max_attempts)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CorrectionLoop {
    pub fn new(generator: Arc<dyn CodeSource>, runner: ExecutionRunner) -> Self {
        Self {
            generator,
            runner,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: Duration::from_secs(300),
            listener: Arc::new(NoopListener),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn AttemptListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Drive `prompt` to success or attempt exhaustion.
    ///
    /// A timed-out session is closed before the next attempt so that a new
    /// one is opened; otherwise the session is reused across attempts and
    /// left open for the caller.
    pub async fn run(&self, prompt: &str, sessions: &mut SessionManager) -> Result<CorrectionOutcome, LoopError> {
        self.run_in_conversation(prompt, &[], sessions).await
    }

    /// Like [`run`](Self::run), with earlier turns of the session given to
    /// the model on every attempt.
    ///
    /// Once a session has been opened, failing to open its replacement
    /// costs an attempt instead of ending the loop. A missing credential
    /// always ends it.
    pub async fn run_in_conversation(
        &self,
        prompt: &str,
        history: &[Turn],
        sessions: &mut SessionManager,
    ) -> Result<CorrectionOutcome, LoopError> {
        let mut state = CorrectionState::new(self.max_attempts);
        let mut error_context: Option<String> = None;
        let mut last_code: Option<GeneratedCode> = None;

        loop {
            let attempt = state.attempt();
            tracing::info!(attempt, max_attempts = state.max_attempts(), "starting attempt");

            let request = GenerationRequest::new(prompt, error_context.take()).with_history(history);
            let code = match self.generator.generate(&request, attempt).await {
                Ok(code) => code,
                Err(source) => {
                    let last = LastAttempt { code: last_code, result: state.last_result().cloned() };
                    return Err(LoopError::Generation { attempt, source, last });
                }
            };
            self.listener.on_generated(&code);
            last_code = Some(code.clone());

            let reopening = sessions.opened() > 0;
            let result = match sessions.acquire().await {
                Ok(session) => self.runner.run_once(session, &code.source_text, self.timeout).await,
                Err(source) if !reopening || matches!(source, SandboxError::MissingCredential(_)) => {
                    let last = LastAttempt { code: last_code, result: state.last_result().cloned() };
                    return Err(LoopError::Session { attempt, source, last });
                }
                Err(source) => {
                    tracing::warn!(attempt, error = %source, "could not replace sandbox session");
                    let message = source.error_context();
                    ExecutionResult::failed(String::new(), String::new(), FailureKind::Boundary, message)
                }
            };
            self.listener.on_result(attempt, &result);

            if result.timed_out() {
                tracing::warn!(attempt, "execution timed out; discarding session");
                sessions.discard().await;
            }

            let next_context = state.record(result.clone());
            if state.is_terminal() {
                tracing::info!(attempt, succeeded = result.succeeded, "correction loop finished");
                return Ok(if result.succeeded {
                    CorrectionOutcome::Succeeded { code, result }
                } else {
                    CorrectionOutcome::Exhausted { code, result }
                });
            }
            error_context = next_context;
        }
    }
}
