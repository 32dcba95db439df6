//! Command handlers and the wiring they share.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use ranalyst::{
    artifacts,
    config::Config,
    correction::{AttemptListener, CorrectionLoop, CorrectionOutcome, LoopError},
    execution::{
        observer::{ConsoleObserver, OutputObserver, SilentObserver},
        ExecutionResult, ExecutionRunner, FailurePolicy, Language,
    },
    generator::{CodeGenerator, GeneratedCode, Workspace},
    history::{HistoryEntry, SessionHistory},
    llm,
    printer::{MarkdownPrinter, TextPrinter},
    sandbox::{E2bProvider, SessionManager},
};

pub mod history;
pub mod info;
pub mod interactive;
pub mod prompt;
pub mod run;

/// Switches taken from the command line rather than the config.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    pub input_dir: Option<PathBuf>,
    pub quiet: bool,
    pub install: bool,
}

pub(crate) fn session_manager(cfg: &Config, opts: &HandlerOptions) -> Result<SessionManager> {
    let provider = E2bProvider::from_config(cfg)?;
    if let Some(dir) = &opts.input_dir {
        if !dir.is_dir() {
            anyhow::bail!("input directory not found: {}", dir.display());
        }
    }
    Ok(SessionManager::new(Arc::new(provider))
        .with_inputs(opts.input_dir.clone(), cfg.remote_upload_dir()))
}

pub(crate) fn runner(cfg: &Config, language: Language, opts: &HandlerOptions) -> ExecutionRunner {
    let observer: Arc<dyn OutputObserver> = if opts.quiet {
        Arc::new(SilentObserver)
    } else {
        Arc::new(ConsoleObserver)
    };
    ExecutionRunner::new(language, cfg.remote_workdir())
        .with_policy(FailurePolicy {
            stderr_is_failure: cfg.get_bool("FAIL_ON_STDERR"),
        })
        .with_install_preamble(opts.install)
        .with_observer(observer)
}

/// Open the session up front so the generator can name the uploaded inputs.
pub(crate) async fn correction_loop(
    cfg: &Config,
    language: Language,
    opts: &HandlerOptions,
    sessions: &mut SessionManager,
) -> Result<CorrectionLoop> {
    sessions.acquire().await.context("opening sandbox session")?;

    let backend = llm::backend_from_config(cfg)?;
    let workspace = Workspace {
        workdir: cfg.remote_workdir(),
        upload_dir: cfg.remote_upload_dir(),
        uploaded_files: sessions.uploaded_files().to_vec(),
    };
    let generator = CodeGenerator::new(backend, language)
        .with_sampling(
            cfg.get_f32("TEMPERATURE").unwrap_or(0.3),
            cfg.get_u64("MAX_TOKENS").unwrap_or(4096) as u32,
        )
        .with_workspace(workspace);

    Ok(CorrectionLoop::new(Arc::new(generator), runner(cfg, language, opts))
        .with_max_attempts(cfg.max_attempts())
        .with_timeout(cfg.sandbox_timeout())
        .with_listener(Arc::new(EchoListener { quiet: opts.quiet, language })))
}

/// Download allowed artifacts of a successful result into OUTPUT_DIR.
pub(crate) async fn collect_artifacts(
    cfg: &Config,
    sessions: &mut SessionManager,
    result: &ExecutionResult,
) -> Result<Vec<PathBuf>> {
    if !result.succeeded || result.created_file_paths.is_empty() {
        return Ok(Vec::new());
    }
    let session = sessions.acquire().await.context("reopening sandbox session")?;
    artifacts::collect(
        session,
        &result.created_file_paths,
        &cfg.artifact_extensions(),
        &cfg.output_dir(),
    )
    .await
}

pub(crate) fn record_history(cfg: &Config, prompt: &str, outcome: &CorrectionOutcome) {
    append_history(cfg, HistoryEntry::from_outcome(prompt, outcome));
}

pub(crate) fn record_failure(cfg: &Config, prompt: &str, err: &LoopError) {
    append_history(cfg, HistoryEntry::from_error(prompt, err));
}

fn append_history(cfg: &Config, entry: HistoryEntry) {
    if !cfg.get_bool("HISTORY_ENABLED") {
        return;
    }
    let history = SessionHistory::from_config(cfg);
    if let Err(e) = history.append(&entry) {
        tracing::warn!(path = %history.path().display(), error = %e, "could not record history");
    }
}

/// Echoes each generated attempt and notes failed ones.
struct EchoListener {
    quiet: bool,
    language: Language,
}

impl AttemptListener for EchoListener {
    fn on_generated(&self, code: &GeneratedCode) {
        if self.quiet {
            return;
        }
        TextPrinter { color: Some("cyan") }.print(&format!("Attempt {}:", code.attempt_number));
        MarkdownPrinter::default().print_code(self.language, &code.source_text);
    }

    fn on_result(&self, attempt: u32, result: &ExecutionResult) {
        if self.quiet || result.succeeded {
            return;
        }
        let message = result.failure_message.as_deref().unwrap_or("execution failed");
        TextPrinter { color: Some("yellow") }.eprint(&format!("Attempt {attempt} failed: {message}"));
    }
}
