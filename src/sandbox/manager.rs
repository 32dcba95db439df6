//! Session lifecycle for one top-level request.

use std::{fmt, path::PathBuf, sync::Arc};

use super::{close_quietly, SandboxError, SandboxProvider, SandboxSession};
use crate::artifacts;

/// Owns at most one live session, opening it lazily and uploading the
/// configured inputs into every freshly opened session.
pub struct SessionManager {
    provider: Arc<dyn SandboxProvider>,
    input_dir: Option<PathBuf>,
    upload_dir: String,
    current: Option<Box<dyn SandboxSession>>,
    uploaded: Vec<String>,
    opened: u32,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("input_dir", &self.input_dir)
            .field("upload_dir", &self.upload_dir)
            .field("current", &self.current.as_ref().map(|s| s.id().to_string()))
            .field("opened", &self.opened)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            input_dir: None,
            upload_dir: "/home/user/uploads".into(),
            current: None,
            uploaded: Vec::new(),
            opened: 0,
        }
    }

    pub fn with_inputs(mut self, input_dir: Option<PathBuf>, upload_dir: impl Into<String>) -> Self {
        self.input_dir = input_dir;
        self.upload_dir = upload_dir.into();
        self
    }

    /// The live session, opening one (and uploading inputs) if needed.
    pub async fn acquire(&mut self) -> Result<&dyn SandboxSession, SandboxError> {
        if self.current.is_none() {
            let mut session = self.provider.open().await?;
            self.opened += 1;
            tracing::info!(session = session.id(), "sandbox session ready");
            if let Some(dir) = &self.input_dir {
                match artifacts::upload_inputs(session.as_ref(), dir, &self.upload_dir).await {
                    Ok(paths) => self.uploaded = paths,
                    Err(e) => {
                        close_quietly(session.as_mut()).await;
                        return Err(e);
                    }
                }
            }
            self.current = Some(session);
        }
        match self.current.as_deref() {
            Some(session) => Ok(session),
            None => Err(SandboxError::Closed),
        }
    }

    /// Close and forget the current session; the next `acquire` opens a new one.
    pub async fn discard(&mut self) {
        if let Some(mut session) = self.current.take() {
            close_quietly(session.as_mut()).await;
        }
    }

    pub async fn close(&mut self) {
        self.discard().await;
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Remote paths of the inputs uploaded into the current session.
    pub fn uploaded_files(&self) -> &[String] {
        &self.uploaded
    }

    /// Sessions opened so far.
    pub fn opened(&self) -> u32 {
        self.opened
    }
}
