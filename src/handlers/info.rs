//! Report what the sandbox interpreter has installed.

use anyhow::{Context, Result};
use ranalyst::{
    config::Config,
    execution::{environment_info, info::INFO_TIMEOUT, ExecutionRunner, FailurePolicy},
    printer,
};

use super::{session_manager, HandlerOptions};

pub async fn run(cfg: &Config, opts: &HandlerOptions, json: bool) -> Result<()> {
    let language = cfg.language()?;
    // Package startup messages on stderr are not failures here
    let runner = ExecutionRunner::new(language, cfg.remote_workdir())
        .with_policy(FailurePolicy { stderr_is_failure: false });
    let mut sessions = session_manager(cfg, opts)?;

    let info = async {
        let session = sessions.acquire().await.context("opening sandbox session")?;
        Ok::<_, anyhow::Error>(environment_info(&runner, session, INFO_TIMEOUT).await?)
    }
    .await;
    sessions.close().await;

    let info = info?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        printer::print_environment(language, &info);
    }
    Ok(())
}
