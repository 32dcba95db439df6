//! In-memory sandbox and model fakes shared by the scenario tests.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use ranalyst::{
    execution::ExecutionResult,
    generator::{CodeSource, GeneratedCode, GenerationRequest},
    llm::{CompletionBackend, CompletionRequest, GenerationError},
    sandbox::{
        FileMetadata, OutputChunk, OutputSink, RunOptions, SandboxError, SandboxProvider, SandboxSession,
    },
};

/// What the next `run` call does.
#[derive(Debug, Clone)]
pub enum Script {
    Complete {
        stdout: String,
        stderr: String,
        files: Vec<(String, Vec<u8>)>,
    },
    Raise {
        name: String,
        value: String,
    },
    Hang,
}

impl Script {
    pub fn ok(stdout: &str) -> Self {
        Self::Complete { stdout: stdout.into(), stderr: String::new(), files: Vec::new() }
    }

    pub fn stderr(text: &str) -> Self {
        Self::Complete { stdout: String::new(), stderr: text.into(), files: Vec::new() }
    }

    pub fn writes(stdout: &str, files: &[(&str, &[u8])]) -> Self {
        Self::Complete {
            stdout: stdout.into(),
            stderr: String::new(),
            files: files.iter().map(|(p, b)| (p.to_string(), b.to_vec())).collect(),
        }
    }

    pub fn raise(name: &str, value: &str) -> Self {
        Self::Raise { name: name.into(), value: value.into() }
    }
}

#[derive(Debug, Default)]
pub struct World {
    pub files: BTreeMap<String, Vec<u8>>,
    pub scripts: VecDeque<Script>,
    pub events: Vec<String>,
    pub executed: Vec<String>,
    pub unreadable: Vec<String>,
    pub opened: u32,
    pub open_calls: u32,
    /// Open calls (counted from 1) that fail with a capacity error.
    pub failing_opens: Vec<u32>,
}

#[derive(Clone, Default)]
pub struct FakeSandbox {
    pub world: Arc<Mutex<World>>,
}

impl FakeSandbox {
    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        let sandbox = Self::default();
        sandbox.world.lock().unwrap().scripts.extend(scripts);
        sandbox
    }

    pub fn fail_open_calls(&self, calls: &[u32]) {
        self.world.lock().unwrap().failing_opens.extend_from_slice(calls);
    }

    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.world.lock().unwrap().files.insert(path.into(), bytes.to_vec());
    }

    pub fn make_unreadable(&self, path: &str) {
        self.world.lock().unwrap().unreadable.push(path.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.world.lock().unwrap().events.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.world.lock().unwrap().executed.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.world.lock().unwrap().files.get(path).cloned()
    }

    pub fn session(&self, id: &str) -> FakeSession {
        FakeSession { id: id.into(), world: self.world.clone(), closed: false }
    }
}

#[async_trait]
impl SandboxProvider for FakeSandbox {
    async fn open(&self) -> Result<Box<dyn SandboxSession>, SandboxError> {
        let id = {
            let mut world = self.world.lock().unwrap();
            world.open_calls += 1;
            if world.failing_opens.contains(&world.open_calls) {
                world.events.push("open refused".into());
                return Err(SandboxError::SessionCreation("503: capacity".into()));
            }
            world.opened += 1;
            let id = format!("sbx-{}", world.opened);
            world.events.push(format!("open {id}"));
            id
        };
        Ok(Box::new(self.session(&id)))
    }
}

pub struct FakeSession {
    id: String,
    world: Arc<Mutex<World>>,
    closed: bool,
}

#[async_trait]
impl SandboxSession for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, code: &str, _options: &RunOptions, sink: OutputSink) -> Result<(), SandboxError> {
        let script = {
            let mut world = self.world.lock().unwrap();
            world.events.push(format!("run {}", self.id));
            world.executed.push(code.to_string());
            world.scripts.pop_front().unwrap_or_else(|| Script::ok(""))
        };
        match script {
            Script::Complete { stdout, stderr, files } => {
                if !stdout.is_empty() {
                    let _ = sink.send(OutputChunk::stdout(stdout));
                }
                if !stderr.is_empty() {
                    let _ = sink.send(OutputChunk::stderr(stderr));
                }
                let mut world = self.world.lock().unwrap();
                for (path, bytes) in files {
                    world.files.insert(path, bytes);
                }
                Ok(())
            }
            Script::Raise { name, value } => Err(SandboxError::ExecutionFailed {
                name,
                value,
                traceback: String::new(),
            }),
            Script::Hang => {
                let _ = sink.send(OutputChunk::stdout("starting\n"));
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(())
            }
        }
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<FileMetadata>, SandboxError> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let world = self.world.lock().unwrap();
        Ok(world
            .files
            .iter()
            .filter_map(|(path, bytes)| {
                let name = path.strip_prefix(&prefix)?;
                if name.contains('/') {
                    return None;
                }
                Some(FileMetadata {
                    name: name.to_string(),
                    path: path.clone(),
                    is_dir: false,
                    size: Some(bytes.len() as u64),
                    modified: None,
                })
            })
            .collect())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let world = self.world.lock().unwrap();
        if world.unreadable.iter().any(|p| p == path) {
            return Err(SandboxError::filesystem(path, "permission denied"));
        }
        world
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::filesystem(path, "not found"))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError> {
        let mut world = self.world.lock().unwrap();
        world.events.push(format!("write {path}"));
        world.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SandboxError> {
        if !self.closed {
            self.closed = true;
            self.world.lock().unwrap().events.push(format!("close {}", self.id));
        }
        Ok(())
    }
}

/// Completion backend replaying canned replies and recording requests.
#[derive(Default)]
pub struct FakeModel {
    replies: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeModel {
    pub fn replying(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn users(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.user.clone()).collect()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionBackend for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(GenerationError::MissingContent)
    }
}

/// Code source that records the requests it was given.
#[derive(Default)]
pub struct RecordingSource {
    pub requests: Mutex<Vec<(GenerationRequest, u32)>>,
}

#[async_trait]
impl CodeSource for RecordingSource {
    async fn generate(&self, request: &GenerationRequest, attempt: u32) -> Result<GeneratedCode, GenerationError> {
        self.requests.lock().unwrap().push((request.clone(), attempt));
        Ok(GeneratedCode { source_text: format!("attempt_{attempt}()"), attempt_number: attempt })
    }
}

pub fn assert_failed(result: &ExecutionResult) {
    assert!(!result.succeeded, "expected failure, got {result:?}");
    assert!(result.failure_message.is_some());
}
