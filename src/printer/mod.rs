//! Printers: text, markdown (termimad) and run summaries.

use std::path::PathBuf;

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use termimad::MadSkin;

use crate::{
    correction::{CorrectionOutcome, LoopError},
    execution::{EnvironmentInfo, ExecutionResult, Language},
    history::HistoryEntry,
};

pub struct TextPrinter {
    pub color: Option<&'static str>,
}

impl TextPrinter {
    pub fn print(&self, text: &str) {
        println!("{}", self.paint(text));
    }

    pub fn eprint(&self, text: &str) {
        eprintln!("{}", self.paint(text));
    }

    fn paint(&self, text: &str) -> String {
        match self.color {
            Some("green") => text.green().to_string(),
            Some("cyan") => text.cyan().to_string(),
            Some("red") => text.red().to_string(),
            Some("yellow") => text.yellow().to_string(),
            _ => text.to_string(),
        }
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default() }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        self.skin.print_text(text);
        println!();
    }

    /// Print `code` as a fenced block tagged with the language, or plain
    /// when stdout is not a terminal.
    pub fn print_code(&self, language: Language, code: &str) {
        if std::io::stdout().is_terminal() {
            self.print(&code_block(language, code));
        } else {
            println!("{}", code.trim_end());
        }
    }
}

pub fn code_block(language: Language, code: &str) -> String {
    format!("```{}\n{}\n```", language.tag(), code.trim_end())
}

/// Final report for a direct file run.
pub fn print_run_summary(result: &ExecutionResult, saved: &[PathBuf]) {
    if result.succeeded {
        TextPrinter { color: Some("green") }.print("Execution succeeded.");
    } else {
        let message = result.failure_message.as_deref().unwrap_or("execution failed");
        TextPrinter { color: Some("red") }.eprint(&format!("Execution failed: {message}"));
    }
    print_saved(saved);
}

/// Final report for a correction-loop request.
pub fn print_outcome(outcome: &CorrectionOutcome, saved: &[PathBuf]) {
    match outcome {
        CorrectionOutcome::Succeeded { code, .. } => {
            TextPrinter { color: Some("green") }
                .print(&format!("Succeeded on attempt {}.", code.attempt_number));
            print_saved(saved);
        }
        CorrectionOutcome::Exhausted { code, result } => {
            let red = TextPrinter { color: Some("red") };
            red.eprint(&format!("Failed after attempt {}.", code.attempt_number));
            red.eprint(&format!("Error:\n{}", result.error_context().trim_end()));
            eprintln!("Failing code:\n{}", code.source_text.trim_end());
        }
    }
}

/// What a request had produced before it stopped early. The error itself
/// is left to the caller.
pub fn print_loop_error(err: &LoopError) {
    let red = TextPrinter { color: Some("red") };
    let last = err.last();
    if let Some(result) = last.result.as_ref().filter(|r| !r.succeeded) {
        red.eprint(&format!("Last execution error:\n{}", result.error_context().trim_end()));
    }
    if let Some(code) = &last.code {
        eprintln!("Last code (attempt {}):\n{}", code.attempt_number, code.source_text.trim_end());
    }
}

fn print_saved(saved: &[PathBuf]) {
    if saved.is_empty() {
        return;
    }
    let cyan = TextPrinter { color: Some("cyan") };
    cyan.print("Saved files:");
    for path in saved {
        println!("  {}", path.display());
    }
}

pub fn print_environment(language: Language, info: &EnvironmentInfo) {
    let cyan = TextPrinter { color: Some("cyan") };
    cyan.print(&format!("{language} version: {}", info.version.as_deref().unwrap_or("unknown")));
    if let Some(system) = &info.system_info {
        println!("System: {system}");
    }
    cyan.print(&format!("Installed packages ({}):", info.installed_packages.len()));
    for package in &info.installed_packages {
        println!("  {package}");
    }
}

pub fn print_history(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("No history yet.");
        return;
    }
    for entry in entries {
        let status = if entry.success {
            "ok".green().to_string()
        } else {
            "failed".red().to_string()
        };
        println!(
            "{}  {}  {} attempt(s)  {}",
            entry.id.chars().take(8).collect::<String>(),
            status,
            entry.attempts,
            first_line(&entry.prompt)
        );
        for file in &entry.created_files {
            println!("          {}", file.dimmed());
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_blocks_are_tagged() {
        assert_eq!(code_block(Language::R, "plot(x)\n"), "```r\nplot(x)\n```");
        assert_eq!(code_block(Language::Python, "print(1)"), "```python\nprint(1)\n```");
    }

    #[test]
    fn first_line_of_multiline_prompt() {
        assert_eq!(first_line("one\ntwo"), "one");
        assert_eq!(first_line(""), "");
    }
}
