use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ranalyst",
    about = "Generate, run and self-correct data-analysis code in a remote sandbox",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Local directory whose files are uploaded into each new sandbox.
    #[arg(long = "input-dir", global = true)]
    pub input_dir: Option<PathBuf>,

    /// Local directory receiving generated files (defaults to OUTPUT_DIR).
    #[arg(long = "output-dir", global = true)]
    pub output_dir: Option<PathBuf>,

    /// Per-execution timeout in milliseconds (defaults to SANDBOX_TIMEOUT_MS).
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Do not echo code or stream sandbox output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Do not prefix code with the package-installation preamble.
    #[arg(long = "no-install", global = true)]
    pub no_install: bool,

    /// Attempts before giving up (defaults to MAX_ATTEMPTS).
    #[arg(long = "max-attempts", global = true)]
    pub max_attempts: Option<u32>,

    /// Target language: r or python.
    #[arg(long, global = true)]
    pub language: Option<String>,

    /// Large language model to use.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Completion provider: anthropic or openai.
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Debug logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Execute a script once, without generation or correction.
    Run {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Generate code for a request and correct it until it runs.
    Prompt {
        #[arg(value_name = "TEXT")]
        text: String,
    },
    /// Read requests line by line, sharing one sandbox session.
    Interactive,
    /// Show recently completed requests.
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the sandbox interpreter version, host and installed packages.
    Info {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Config keys set on the command line, applied over the loaded config.
    pub fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(dir) = &self.output_dir {
            out.push(("OUTPUT_DIR", dir.display().to_string()));
        }
        if let Some(ms) = self.timeout {
            out.push(("SANDBOX_TIMEOUT_MS", ms.to_string()));
        }
        if let Some(n) = self.max_attempts {
            out.push(("MAX_ATTEMPTS", n.to_string()));
        }
        if let Some(lang) = &self.language {
            out.push(("LANGUAGE", lang.clone()));
        }
        if let Some(model) = &self.model {
            out.push(("DEFAULT_MODEL", model.clone()));
        }
        if let Some(provider) = &self.provider {
            out.push(("LLM_PROVIDER", provider.clone()));
        }
        out
    }
}
