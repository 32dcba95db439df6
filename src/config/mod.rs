use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use directories::BaseDirs;

use crate::execution::Language;

/// Process-wide settings, resolved once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let mut map = default_map();

        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(|l| l.ok()) {
                    if let Some((k, v)) = parse_line(&line) {
                        map.insert(k, v);
                    }
                }
            }
        }

        // Environment takes precedence over the rc file
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    /// Defaults overlaid with explicit pairs; no file or environment lookup.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = default_map();
        for (k, v) in pairs {
            map.insert(k.into(), v.into());
        }
        Self { inner: map, config_path: PathBuf::new() }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(|v| v.trim().parse::<f32>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64("REQUEST_TIMEOUT").unwrap_or(60))
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_millis(self.get_u64("SANDBOX_TIMEOUT_MS").unwrap_or(300_000))
    }

    pub fn max_attempts(&self) -> u32 {
        self.get_u64("MAX_ATTEMPTS")
            .map(|n| n.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(3)
    }

    pub fn language(&self) -> Result<Language> {
        self.get("LANGUAGE").unwrap_or_else(|| "r".into()).parse()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.get_path("OUTPUT_DIR").unwrap_or_else(|| PathBuf::from("results"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.get_path("HISTORY_PATH")
            .unwrap_or_else(|| env::temp_dir().join("ranalyst").join("history.jsonl"))
    }

    pub fn remote_workdir(&self) -> String {
        self.get("REMOTE_WORKDIR").unwrap_or_else(|| "/home/user".into())
    }

    /// Upload directory inside the sandbox; relative values hang off the workdir.
    pub fn remote_upload_dir(&self) -> String {
        let dir = self.get("REMOTE_UPLOAD_DIR").unwrap_or_else(|| "uploads".into());
        if dir.starts_with('/') {
            dir
        } else {
            format!("{}/{}", self.remote_workdir().trim_end_matches('/'), dir)
        }
    }

    /// Lower-cased extensions without the leading dot.
    pub fn artifact_extensions(&self) -> Vec<String> {
        self.get("ARTIFACT_EXTENSIONS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (k, v) = line.split_once('=')?;
    let v = v.trim().trim_matches('"');
    Some((k.trim().to_string(), v.to_string()))
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "E2B_API_KEY",
        "E2B_API_BASE",
        "E2B_DOMAIN",
        "SANDBOX_TEMPLATE",
        "ANTHROPIC_API_KEY",
        "OPENAI_API_KEY",
        "LLM_PROVIDER",
        "API_BASE_URL",
        "DEFAULT_MODEL",
        "TEMPERATURE",
        "MAX_TOKENS",
        "REQUEST_TIMEOUT",
        "SANDBOX_TIMEOUT_MS",
        "MAX_ATTEMPTS",
        "CONVERSATION_LENGTH",
        "REMOTE_WORKDIR",
        "REMOTE_UPLOAD_DIR",
        "OUTPUT_DIR",
        "ARTIFACT_EXTENSIONS",
        "FAIL_ON_STDERR",
        "HISTORY_PATH",
        "HISTORY_ENABLED",
        "LANGUAGE",
    ];

    KEYS.contains(&k) || k.starts_with("RANALYST_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("ranalyst").join(".ranalystrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    let history = env::temp_dir().join("ranalyst").join("history.jsonl");
    m.insert("HISTORY_PATH".into(), path_string(&history));
    m.insert("OUTPUT_DIR".into(), "results".into());

    // Numbers
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("SANDBOX_TIMEOUT_MS".into(), "300000".into());
    m.insert("MAX_ATTEMPTS".into(), "3".into());
    m.insert("CONVERSATION_LENGTH".into(), "20".into());
    m.insert("TEMPERATURE".into(), "0.3".into());
    m.insert("MAX_TOKENS".into(), "4096".into());

    // Strings
    m.insert("LLM_PROVIDER".into(), "anthropic".into());
    m.insert("API_BASE_URL".into(), "default".into());
    m.insert("E2B_API_BASE".into(), "https://api.e2b.dev".into());
    m.insert("E2B_DOMAIN".into(), "e2b.dev".into());
    m.insert("SANDBOX_TEMPLATE".into(), "code-interpreter-v1".into());
    m.insert("REMOTE_WORKDIR".into(), "/home/user".into());
    m.insert("REMOTE_UPLOAD_DIR".into(), "uploads".into());
    m.insert(
        "ARTIFACT_EXTENSIONS".into(),
        "png,jpg,jpeg,svg,pdf,csv,tsv,txt,html,rds,xlsx,json".into(),
    );
    m.insert("LANGUAGE".into(), "r".into());

    // Bools as strings
    m.insert("FAIL_ON_STDERR".into(), "true".into());
    m.insert("HISTORY_ENABLED".into(), "true".into());

    m
}

fn path_string(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}
