//! Interpreter version, host details and installed packages of a session.

use std::time::Duration;

use serde::Serialize;

use super::{ExecutionRunner, Language};
use crate::sandbox::{SandboxError, SandboxSession};

/// Listing every installed package can be slow on a cold sandbox.
pub const INFO_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_LABEL: &str = "System Info:";
const PACKAGES_LABEL: &str = "Installed Packages:";

const R_SCRIPT: &str = r#"r_version <- paste0(R.version$major, ".", R.version$minor)
pkgs <- as.data.frame(installed.packages()[, c("Package", "Version")])
pkgs_str <- paste(paste(pkgs$Package, pkgs$Version, sep = " ("), ")", sep = "", collapse = ", ")
sys_info <- Sys.info()
sys_info_str <- paste(names(sys_info), sys_info, sep = ": ", collapse = ", ")
cat("R Version:", r_version, "\n")
cat("System Info:", sys_info_str, "\n")
cat("Installed Packages:", pkgs_str, "\n")
"#;

const PYTHON_SCRIPT: &str = r#"import platform
from importlib import metadata
print("Python Version:", platform.python_version())
print("System Info:", ", ".join(f"{k}: {v}" for k, v in platform.uname()._asdict().items()))
print("Installed Packages:", ", ".join(sorted(f"{d.metadata['Name']} ({d.version})" for d in metadata.distributions())))
"#;

/// Script printing one labelled line per fact.
pub fn script(language: Language) -> &'static str {
    match language {
        Language::R => R_SCRIPT,
        Language::Python => PYTHON_SCRIPT,
    }
}

fn version_label(language: Language) -> &'static str {
    match language {
        Language::R => "R Version:",
        Language::Python => "Python Version:",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentInfo {
    pub version: Option<String>,
    pub system_info: Option<String>,
    /// `name (version)` entries as the interpreter reports them.
    pub installed_packages: Vec<String>,
}

impl EnvironmentInfo {
    /// Pick the labelled lines out of the script's stdout; others are ignored.
    pub fn parse(language: Language, stdout: &str) -> Self {
        let mut info = Self::default();
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix(version_label(language)) {
                info.version = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix(SYSTEM_LABEL) {
                info.system_info = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix(PACKAGES_LABEL) {
                info.installed_packages = rest
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }
        info
    }

    pub fn is_empty(&self) -> bool {
        self.version.is_none() && self.system_info.is_none() && self.installed_packages.is_empty()
    }
}

/// Run the info script through `runner` and parse what it printed.
///
/// The runner should have the install preamble disabled; the script only
/// uses base functionality.
pub async fn environment_info(
    runner: &ExecutionRunner,
    session: &dyn SandboxSession,
    timeout: Duration,
) -> Result<EnvironmentInfo, SandboxError> {
    let language = runner.language();
    let result = runner.run_once(session, script(language), timeout).await;
    if !result.succeeded {
        return Err(SandboxError::Provider(format!(
            "environment query failed: {}",
            result.error_context().trim_end()
        )));
    }
    let info = EnvironmentInfo::parse(language, &result.stdout);
    if info.is_empty() {
        tracing::warn!(session = session.id(), "environment query printed nothing recognisable");
    }
    Ok(info)
}
