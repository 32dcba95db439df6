//! Execute a local script once.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ranalyst::{config::Config, execution::Language, printer};

use super::{collect_artifacts, runner, session_manager, HandlerOptions};

pub async fn run(cfg: &Config, opts: &HandlerOptions, file: &Path) -> Result<()> {
    let code = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let language = match Language::from_path(file) {
        Some(language) => language,
        None => cfg.language()?,
    };
    let runner = runner(cfg, language, opts);
    let mut sessions = session_manager(cfg, opts)?;

    let outcome = async {
        let session = sessions.acquire().await.context("opening sandbox session")?;
        let result = runner.run_once(session, &code, cfg.sandbox_timeout()).await;
        let saved = collect_artifacts(cfg, &mut sessions, &result).await?;
        Ok::<_, anyhow::Error>((result, saved))
    }
    .await;
    sessions.close().await;

    let (result, saved) = outcome?;
    printer::print_run_summary(&result, &saved);
    if !result.succeeded {
        bail!("{} failed", file.display());
    }
    Ok(())
}
