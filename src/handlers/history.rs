use anyhow::Result;
use ranalyst::{config::Config, history::SessionHistory, printer};

pub fn run(cfg: &Config, limit: usize) -> Result<()> {
    let history = SessionHistory::from_config(cfg);
    let entries = history.recent(limit)?;
    printer::print_history(&entries);
    Ok(())
}
