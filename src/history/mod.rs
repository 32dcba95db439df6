//! Append-only record of completed requests (JSON Lines).

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    correction::{CorrectionOutcome, LoopError},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub prompt: String,
    pub success: bool,
    pub attempts: u32,
    pub code: String,
    /// Unix seconds.
    pub timestamp: u64,
    pub created_files: Vec<String>,
}

impl HistoryEntry {
    pub fn new(prompt: &str, success: bool, attempts: u32, code: &str, created_files: Vec<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: entry_id(prompt, timestamp),
            prompt: prompt.to_string(),
            success,
            attempts,
            code: code.to_string(),
            timestamp,
            created_files,
        }
    }

    pub fn from_outcome(prompt: &str, outcome: &CorrectionOutcome) -> Self {
        Self::new(
            prompt,
            outcome.succeeded(),
            outcome.attempts(),
            &outcome.code().source_text,
            outcome.result().created_file_paths.clone(),
        )
    }

    /// A request the loop gave up on early, with whatever code it had.
    pub fn from_error(prompt: &str, err: &LoopError) -> Self {
        let code = err.last().code.as_ref().map(|c| c.source_text.as_str()).unwrap_or_default();
        Self::new(prompt, false, err.attempt(), code, Vec::new())
    }
}

fn entry_id(prompt: &str, timestamp: u64) -> String {
    let digest = md5::compute(format!("{timestamp}:{prompt}"));
    format!("{:x}", digest)
}

#[derive(Debug, Clone)]
pub struct SessionHistory {
    path: PathBuf,
}

impl SessionHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.history_path())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating history directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening history file {}", self.path.display()))?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// All readable entries, oldest first. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading history file {}", self.path.display()))?;
        Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<HistoryEntry>(l) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed history line");
                    None
                }
            })
            .collect())
    }

    /// The `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut all = self.read_all()?;
        all.reverse();
        all.truncate(limit);
        Ok(all)
    }
}
