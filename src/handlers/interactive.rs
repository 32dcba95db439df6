//! Line-by-line requests sharing one sandbox session.

use std::io::{self, Write};

use anyhow::Result;
use is_terminal::IsTerminal;
use ranalyst::{
    config::Config,
    execution::Language,
    generator::{Conversation, Turn},
    printer::{self, TextPrinter},
    sandbox::SessionManager,
};

use super::{
    collect_artifacts, correction_loop, record_failure, record_history, session_manager, HandlerOptions,
};

pub async fn run(cfg: &Config, opts: &HandlerOptions) -> Result<()> {
    let language = cfg.language()?;
    let mut sessions = session_manager(cfg, opts)?;
    let result = repl(cfg, opts, language, &mut sessions).await;
    sessions.close().await;
    result
}

async fn repl(
    cfg: &Config,
    opts: &HandlerOptions,
    language: Language,
    sessions: &mut SessionManager,
) -> Result<()> {
    let correction = correction_loop(cfg, language, opts, sessions).await?;
    let mut conversation = Conversation::from_config(cfg);
    TextPrinter { color: Some("cyan") }
        .print(&format!("ranalyst ({language}); type exit or quit to leave, reset to forget earlier requests."));

    let stdin_is_tty = io::stdin().is_terminal();
    loop {
        if stdin_is_tty {
            print!(">>> ");
            io::stdout().flush().ok();
        }
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt.eq_ignore_ascii_case("exit") || prompt.eq_ignore_ascii_case("quit") {
            break;
        }
        if prompt.eq_ignore_ascii_case("reset") {
            conversation.clear();
            continue;
        }

        let outcome = match correction.run_in_conversation(prompt, conversation.turns(), sessions).await {
            Ok(outcome) => outcome,
            Err(e) => {
                TextPrinter { color: Some("red") }.eprint(&format!("Error: {e}"));
                printer::print_loop_error(&e);
                record_failure(cfg, prompt, &e);
                continue;
            }
        };
        conversation.push(Turn::new(prompt, outcome.code().source_text.clone()));
        let saved = match collect_artifacts(cfg, sessions, outcome.result()).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(error = %e, "artifact collection failed");
                Vec::new()
            }
        };
        record_history(cfg, prompt, &outcome);
        printer::print_outcome(&outcome, &saved);
    }
    Ok(())
}
