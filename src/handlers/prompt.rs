//! One natural-language request through the correction loop.

use anyhow::{bail, Result};
use ranalyst::{config::Config, correction::CorrectionOutcome, printer};

use super::{
    collect_artifacts, correction_loop, record_failure, record_history, session_manager, HandlerOptions,
};

pub async fn run(cfg: &Config, opts: &HandlerOptions, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Provide a request to generate code for");
    }
    let language = cfg.language()?;
    let mut sessions = session_manager(cfg, opts)?;

    let finished = async {
        let correction = correction_loop(cfg, language, opts, &mut sessions).await?;
        match correction.run(text, &mut sessions).await {
            Ok(outcome) => {
                let saved = collect_artifacts(cfg, &mut sessions, outcome.result()).await?;
                Ok::<_, anyhow::Error>(Ok((outcome, saved)))
            }
            Err(err) => Ok(Err(err)),
        }
    }
    .await;
    sessions.close().await;

    let (outcome, saved) = match finished? {
        Ok(done) => done,
        Err(err) => {
            record_failure(cfg, text, &err);
            printer::print_loop_error(&err);
            return Err(err.into());
        }
    };
    record_history(cfg, text, &outcome);
    printer::print_outcome(&outcome, &saved);
    match outcome {
        CorrectionOutcome::Succeeded { .. } => Ok(()),
        CorrectionOutcome::Exhausted { code, .. } => {
            bail!("no working code after {} attempt(s)", code.attempt_number)
        }
    }
}
