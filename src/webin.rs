//! webin-cli invocation for assembly manifests

use crate::config::SubmissionConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Environment variable webin-cli reads the password from
pub const PASSWORD_ENV: &str = "WEBIN_PW";

/// Result of running webin-cli for one manifest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebinRun {
    /// Manifest that was validated or submitted
    pub manifest: PathBuf,
    /// Whether the tool exited with status 0
    pub success: bool,
    /// Exit code, if the tool was not killed by a signal
    pub exit_code: Option<i32>,
}

/// Runs the archive's submission tool (`java -jar webin-cli.jar`)
///
/// The password is handed over through the child's environment, never on the
/// command line.
pub struct WebinCli {
    java: PathBuf,
    jar: PathBuf,
    context: String,
    username: String,
    password: String,
    test: bool,
}

impl WebinCli {
    /// Build from configuration; `java` is looked up on `PATH` unless configured
    pub fn new(
        config: &SubmissionConfig,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let java = match &config.java_bin {
            Some(path) => path.clone(),
            None => which::which("java").map_err(|e| {
                Error::ExternalTool(format!("java not found in PATH: {e}"))
            })?,
        };
        Ok(Self {
            java,
            jar: config.webin_jar.clone(),
            context: config.context.clone(),
            username: username.into(),
            password: password.into(),
            test: config.test,
        })
    }

    /// Java binary in use
    pub fn java(&self) -> &Path {
        &self.java
    }

    /// Arguments passed to java for `manifest`
    pub fn args(&self, manifest: &Path, submit: bool) -> Vec<String> {
        let mut args = vec![
            "-jar".to_string(),
            self.jar.display().to_string(),
            format!("-manifest={}", manifest.display()),
            format!("-context={}", self.context),
            format!("-userName={}", self.username),
            format!("-passwordEnv={PASSWORD_ENV}"),
            "-validate".to_string(),
        ];
        if submit {
            args.push("-submit".to_string());
        }
        if self.test {
            args.push("-test".to_string());
        }
        args
    }

    /// Validate (and with `submit`, submit) one manifest
    ///
    /// The tool's output goes to the inherited stdout/stderr. A non-zero exit
    /// is reported in the result, not as an error.
    pub async fn run(&self, manifest: &Path, submit: bool) -> Result<WebinRun> {
        tracing::info!(manifest = %manifest.display(), submit, test = self.test, "Running webin-cli");
        let status = Command::new(&self.java)
            .args(self.args(manifest, submit))
            .env(PASSWORD_ENV, &self.password)
            .status()
            .await
            .map_err(|e| {
                Error::ExternalTool(format!("Failed to execute {}: {}", self.java.display(), e))
            })?;

        if !status.success() {
            tracing::warn!(manifest = %manifest.display(), status = %status, "webin-cli reported failure");
        }
        Ok(WebinRun {
            manifest: manifest.to_path_buf(),
            success: status.success(),
            exit_code: status.code(),
        })
    }

    /// Run every `*.manifest` in `dir`, in name order
    ///
    /// A failing manifest does not stop the others.
    pub async fn run_all(&self, dir: &Path, submit: bool) -> Result<Vec<WebinRun>> {
        let mut manifests = manifests_in(dir)?;
        manifests.sort();
        let mut runs = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            runs.push(self.run(&manifest, submit).await?);
        }
        Ok(runs)
    }
}

fn manifests_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut manifests = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "manifest") {
            manifests.push(path);
        }
    }
    Ok(manifests)
}
