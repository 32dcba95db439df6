use crate::execution::ExecutionResult;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Attempting,
    Succeeded,
    Exhausted,
}

/// Retry bookkeeping for one top-level request.
///
/// `attempt` starts at 1, only grows, and never passes `max_attempts`.
/// `Succeeded` and `Exhausted` are terminal.
#[derive(Debug, Clone)]
pub struct CorrectionState {
    attempt: u32,
    max_attempts: u32,
    phase: Phase,
    last_result: Option<ExecutionResult>,
}

impl CorrectionState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            phase: Phase::Attempting,
            last_result: None,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase != Phase::Attempting
    }

    pub fn last_result(&self) -> Option<&ExecutionResult> {
        self.last_result.as_ref()
    }

    /// Record the current attempt's result and advance.
    ///
    /// Returns the error context for the next attempt when another attempt
    /// is permitted, `None` once the state is terminal.
    pub fn record(&mut self, result: ExecutionResult) -> Option<String> {
        if self.is_terminal() {
            return None;
        }
        let next_context = if result.succeeded {
            self.phase = Phase::Succeeded;
            None
        } else if self.attempt < self.max_attempts {
            self.attempt += 1;
            Some(result.error_context())
        } else {
            self.phase = Phase::Exhausted;
            None
        };
        self.last_result = Some(result);
        next_context
    }
}

impl Default for CorrectionState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
