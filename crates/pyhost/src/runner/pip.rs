//! Package installation through `python -m pip`.

use std::path::Path;

use tracing::info;

use super::{CommandSpec, Forward, RunError, run_capture};

/// pip invocations for one interpreter.
#[derive(Debug, Clone)]
pub struct PipCommand {
    python: String,
    install_args: Vec<String>,
}

impl PipCommand {
    pub fn new(python: impl Into<String>, install_args: Vec<String>) -> Self {
        Self {
            python: python.into(),
            install_args,
        }
    }

    fn base(&self, cwd: &Path, verb: &str) -> CommandSpec {
        CommandSpec::new(&self.python, cwd).args(["-m", "pip", verb])
    }

    /// Install everything listed in `manifest`, forwarding output live.
    pub async fn install_requirements(
        &self,
        cwd: &Path,
        manifest: &Path,
        forward: Forward<'_>,
    ) -> Result<String, RunError> {
        let spec = self
            .base(cwd, "install")
            .args(self.install_args.iter().cloned())
            .arg("-r")
            .arg(manifest.to_string_lossy());

        let output = run_capture(&spec, Some(forward)).await?;
        if !output.exit.success() {
            let code = output.exit.code_or_default();
            return Err(RunError::Failed(
                output.error_text(|| format!("pip install failed with code {}", code)),
            ));
        }
        info!(project_id = forward.project_id, "requirements installed");
        Ok(output.stdout)
    }

    pub async fn install_package(&self, cwd: &Path, name: &str) -> Result<String, RunError> {
        validate_package_name(name)?;
        let spec = self
            .base(cwd, "install")
            .args(self.install_args.iter().cloned())
            .arg(name);

        let output = run_capture(&spec, None).await?;
        if !output.exit.success() {
            return Err(RunError::Failed(
                output.error_text(|| format!("Failed to install {}", name)),
            ));
        }
        Ok(output.stdout)
    }

    pub async fn uninstall_package(&self, cwd: &Path, name: &str) -> Result<String, RunError> {
        validate_package_name(name)?;
        let spec = self
            .base(cwd, "uninstall")
            .args(["-y", "--break-system-packages"])
            .arg(name);

        let output = run_capture(&spec, None).await?;
        if !output.exit.success() {
            return Err(RunError::Failed(
                output.error_text(|| format!("Failed to uninstall {}", name)),
            ));
        }
        Ok(output.stdout)
    }
}

/// Reject names pip would read as options or that could not be a single requirement.
pub fn validate_package_name(name: &str) -> Result<(), RunError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && !name.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(RunError::InvalidPackage(name.to_string()))
    }
}
