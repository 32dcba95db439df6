//! E2B cloud sandbox adapter.
//!
//! Sessions are created through the control API; code runs through the
//! code-interpreter endpoint inside the sandbox (port 49999), which streams
//! NDJSON events; files go through the sandbox daemon (port 49983).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;

use super::{
    FileMetadata, OutputChunk, OutputSink, RunOptions, SandboxError, SandboxProvider, SandboxSession,
};
use crate::{config::Config, lines::LineBuffer};

const INTERPRETER_PORT: u16 = 49999;
const ENVD_PORT: u16 = 49983;
// Grace on top of the caller's timeout so the caller's own deadline fires first
const RUN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct E2bProvider {
    http: Client,
    api_base: String,
    domain: String,
    template: String,
    api_key: Option<String>,
    session_timeout: Duration,
}

impl E2bProvider {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(cfg.request_timeout()).build()?;
        // Keep the remote context alive a little longer than one execution
        let session_timeout = cfg.sandbox_timeout() + Duration::from_secs(300);
        Ok(Self {
            http,
            api_base: cfg
                .get("E2B_API_BASE")
                .unwrap_or_else(|| "https://api.e2b.dev".into())
                .trim_end_matches('/')
                .to_string(),
            domain: cfg.get("E2B_DOMAIN").unwrap_or_else(|| "e2b.dev".into()),
            template: cfg.get("SANDBOX_TEMPLATE").unwrap_or_else(|| "code-interpreter-v1".into()),
            api_key: cfg.get("E2B_API_KEY").filter(|k| !k.trim().is_empty()),
            session_timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSandbox {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
}

#[async_trait]
impl SandboxProvider for E2bProvider {
    async fn open(&self) -> Result<Box<dyn SandboxSession>, SandboxError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(SandboxError::MissingCredential("E2B_API_KEY"))?;

        let resp = self
            .http
            .post(format!("{}/sandboxes", self.api_base))
            .header("X-API-Key", key)
            .json(&serde_json::json!({
                "templateID": self.template,
                "timeout": self.session_timeout.as_secs(),
            }))
            .send()
            .await
            .map_err(|e| SandboxError::SessionCreation(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::SessionCreation(format!("{status}: {body}")));
        }
        let created: CreatedSandbox = resp
            .json()
            .await
            .map_err(|e| SandboxError::SessionCreation(e.to_string()))?;

        tracing::info!(session = %created.sandbox_id, template = %self.template, "sandbox session opened");
        Ok(Box::new(E2bSession {
            http: self.http.clone(),
            api_base: self.api_base.clone(),
            api_key: key.to_string(),
            interpreter_url: format!("https://{}-{}.{}", INTERPRETER_PORT, created.sandbox_id, self.domain),
            envd_url: format!("https://{}-{}.{}", ENVD_PORT, created.sandbox_id, self.domain),
            access_token: created.envd_access_token,
            id: created.sandbox_id,
            closed: false,
        }))
    }
}

#[derive(Debug)]
pub struct E2bSession {
    http: Client,
    api_base: String,
    api_key: String,
    interpreter_url: String,
    envd_url: String,
    access_token: Option<String>,
    id: String,
    closed: bool,
}

impl E2bSession {
    fn ensure_open(&self) -> Result<(), SandboxError> {
        if self.closed {
            Err(SandboxError::Closed)
        } else {
            Ok(())
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => req.header("X-Access-Token", token),
            None => req,
        }
    }
}

/// One line of the interpreter's NDJSON execution stream.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ExecEvent {
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    Error {
        name: String,
        value: String,
        #[serde(default)]
        traceback: String,
    },
    EndOfExecution,
    #[serde(other)]
    Other,
}

fn parse_exec_line(line: &str) -> Option<ExecEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

#[derive(Debug, Deserialize)]
struct ListDirResponse {
    #[serde(default)]
    entries: Vec<EntryInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryInfo {
    name: String,
    path: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    size: Option<serde_json::Value>,
    #[serde(default)]
    modified_time: Option<String>,
}

impl From<EntryInfo> for FileMetadata {
    fn from(e: EntryInfo) -> Self {
        // Connect JSON encodes int64 as a string
        let size = e.size.and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        });
        Self {
            is_dir: e.kind.contains("DIRECTORY"),
            name: e.name,
            path: e.path,
            size,
            modified: e.modified_time,
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    failure: Option<SandboxError>,
    finished: bool,
}

impl Progress {
    fn dispatch(&mut self, event: Option<ExecEvent>, sink: &OutputSink) {
        match event {
            Some(ExecEvent::Stdout { text }) => {
                let _ = sink.send(OutputChunk::stdout(text));
            }
            Some(ExecEvent::Stderr { text }) => {
                let _ = sink.send(OutputChunk::stderr(text));
            }
            Some(ExecEvent::Error { name, value, traceback }) => {
                self.failure = Some(SandboxError::ExecutionFailed { name, value, traceback });
            }
            Some(ExecEvent::EndOfExecution) => self.finished = true,
            Some(ExecEvent::Other) | None => {}
        }
    }
}

fn fs_status_error(path: &str, status: StatusCode, body: String) -> SandboxError {
    let reason = match status {
        StatusCode::NOT_FOUND => "not found".to_string(),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => "permission denied".to_string(),
        other => format!("{other}: {body}"),
    };
    SandboxError::filesystem(path, reason)
}

#[async_trait]
impl SandboxSession for E2bSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, code: &str, options: &RunOptions, sink: OutputSink) -> Result<(), SandboxError> {
        self.ensure_open()?;
        let req = self
            .http
            .post(format!("{}/execute", self.interpreter_url))
            .timeout(options.timeout + RUN_GRACE)
            .json(&serde_json::json!({
                "code": code,
                "language": options.language.tag(),
            }));
        let resp = self.authorized(req).send().await.map_err(SandboxError::Transport)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::Provider(format!("interpreter returned {status}: {body}")));
        }

        let mut progress = Progress::default();
        let mut lines = LineBuffer::default();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(SandboxError::Transport)?;
            lines.push(&bytes);
            while let Some(line) = lines.next_line() {
                progress.dispatch(parse_exec_line(&line), &sink);
            }
        }
        if let Some(line) = lines.finish() {
            progress.dispatch(parse_exec_line(&line), &sink);
        }

        match progress {
            Progress { failure: Some(err), .. } => Err(err),
            Progress { finished: true, .. } => Ok(()),
            // A stream that stops without an end marker never reported a result
            Progress { finished: false, .. } => Err(SandboxError::Provider(
                "execution stream ended before the interpreter reported completion".into(),
            )),
        }
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<FileMetadata>, SandboxError> {
        self.ensure_open()?;
        let req = self
            .http
            .post(format!("{}/filesystem.Filesystem/ListDir", self.envd_url))
            .header("Connect-Protocol-Version", "1")
            .json(&serde_json::json!({ "path": dir, "depth": 1 }));
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| SandboxError::filesystem(dir, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(fs_status_error(dir, status, body));
        }
        let listing: ListDirResponse = resp.json().await.map_err(|e| SandboxError::filesystem(dir, e))?;
        Ok(listing.entries.into_iter().map(FileMetadata::from).collect())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        self.ensure_open()?;
        let req = self
            .http
            .get(format!("{}/files", self.envd_url))
            .query(&[("path", path), ("username", "user")]);
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| SandboxError::filesystem(path, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(fs_status_error(path, status, body));
        }
        let bytes = resp.bytes().await.map_err(|e| SandboxError::filesystem(path, e))?;
        Ok(bytes.to_vec())
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError> {
        self.ensure_open()?;
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let part = multipart::Part::bytes(content.to_vec()).file_name(file_name);
        let form = multipart::Form::new().part("file", part);
        let req = self
            .http
            .post(format!("{}/files", self.envd_url))
            .query(&[("path", path), ("username", "user")])
            .multipart(form);
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| SandboxError::filesystem(path, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(fs_status_error(path, status, body));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SandboxError> {
        if self.closed {
            return Ok(());
        }
        let resp = self
            .http
            .delete(format!("{}/sandboxes/{}", self.api_base, self.id))
            .header("X-API-Key", &self.api_key)
            .send()
            .await;
        // The handle is spent whatever the provider answers
        self.closed = true;
        let resp = resp.map_err(SandboxError::Transport)?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                tracing::debug!(session = %self.id, "sandbox already expired");
                Ok(())
            }
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(SandboxError::Provider(format!("close failed with {s}: {body}")))
            }
        }
    }
}
