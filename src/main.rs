mod cli;
mod handlers;

use anyhow::Result;
use ranalyst::config::Config;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::Command;
use handlers::HandlerOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr so they never interleave with streamed stdout
    let default_filter = if args.verbose { "ranalyst=debug" } else { "ranalyst=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    let mut cfg = Config::load();
    for (key, value) in args.overrides() {
        cfg.set(key, value);
    }
    tracing::debug!(config = %cfg.config_path.display(), "configuration loaded");

    let opts = HandlerOptions {
        input_dir: args.input_dir.clone(),
        quiet: args.quiet,
        install: !args.no_install,
    };

    match &args.command {
        Command::Run { file } => handlers::run::run(&cfg, &opts, file).await,
        Command::Prompt { text } => handlers::prompt::run(&cfg, &opts, text).await,
        Command::Interactive => handlers::interactive::run(&cfg, &opts).await,
        Command::History { limit } => handlers::history::run(&cfg, *limit),
        Command::Info { json } => handlers::info::run(&cfg, &opts, *json).await,
    }
}
