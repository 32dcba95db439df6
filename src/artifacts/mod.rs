//! Moving files between the local machine and a sandbox session.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::sandbox::{SandboxError, SandboxSession};

/// Base name of a remote path.
pub fn base_name(remote_path: &str) -> &str {
    remote_path.trim_end_matches('/').rsplit('/').next().unwrap_or(remote_path)
}

/// Whether `remote_path` ends in one of `allowlist` (case-insensitive, no dots).
pub fn is_allowed(remote_path: &str, allowlist: &[String]) -> bool {
    let name = base_name(remote_path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => allowlist.iter().any(|a| a.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

/// Download the allowed files among `created` into `local_dir`.
///
/// Each file lands under its remote base name; a later file with the same
/// base name overwrites an earlier one. A file that cannot be read or
/// written is logged and skipped. Returns the local paths written.
pub async fn collect(
    session: &dyn SandboxSession,
    created: &[String],
    allowlist: &[String],
    local_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let wanted: Vec<&String> = created.iter().filter(|p| is_allowed(p, allowlist)).collect();
    if wanted.is_empty() {
        return Ok(Vec::new());
    }
    tokio::fs::create_dir_all(local_dir)
        .await
        .with_context(|| format!("creating output directory {}", local_dir.display()))?;

    let mut written = Vec::new();
    for remote in wanted {
        let bytes = match session.read_file(remote).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %remote, error = %e, "skipping artifact");
                continue;
            }
        };
        let local = local_dir.join(base_name(remote));
        if let Err(e) = tokio::fs::write(&local, &bytes).await {
            tracing::warn!(path = %remote, local = %local.display(), error = %e, "skipping artifact");
            continue;
        }
        tracing::info!(path = %remote, local = %local.display(), bytes = bytes.len(), "artifact saved");
        // last write wins
        written.retain(|p| p != &local);
        written.push(local);
    }
    Ok(written)
}

/// Upload every regular file directly inside `local_dir` to `remote_dir`.
///
/// Only base names are used remotely. Returns the remote paths in file-name
/// order; the first failed write aborts the upload.
pub async fn upload_inputs(
    session: &dyn SandboxSession,
    local_dir: &Path,
    remote_dir: &str,
) -> Result<Vec<String>, SandboxError> {
    let local_error = |e: std::io::Error| SandboxError::filesystem(local_dir.display().to_string(), e);

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(local_dir).await.map_err(local_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(local_error)? {
        if entry.file_type().await.map_err(local_error)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut uploaded = Vec::with_capacity(files.len());
    for path in files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let remote = format!("{}/{}", remote_dir.trim_end_matches('/'), name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SandboxError::filesystem(path.display().to_string(), e))?;
        session.write_file(&remote, &bytes).await?;
        tracing::info!(local = %path.display(), remote = %remote, "input uploaded");
        uploaded.push(remote);
    }
    Ok(uploaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(exts: &[&str]) -> Vec<String> {
        exts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allowlist_is_case_insensitive() {
        let list = allow(&["png", "csv"]);
        assert!(is_allowed("/home/user/plot.PNG", &list));
        assert!(is_allowed("summary.csv", &list));
        assert!(!is_allowed("/home/user/model.rds", &list));
        assert!(!is_allowed("/home/user/.png", &list));
        assert!(!is_allowed("/home/user/png", &list));
    }

    #[test]
    fn base_name_of_remote_paths() {
        assert_eq!(base_name("/home/user/out/plot.png"), "plot.png");
        assert_eq!(base_name("plot.png"), "plot.png");
    }
}
