//! Local test binary execution using `tokio::process`

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::TARGET_ENV;
use crate::error::ExecError;
use crate::result::ExitStatus;

/// Runs the test binary on this machine
///
/// The child inherits stdin, stdout and stderr. [`TARGET_ENV`] is removed
/// from its environment, a locally running test must never believe it runs
/// on a remote target.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    /// Create a new local runner
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn command(binary: &Path, flags: &[String]) -> Command {
        let mut cmd = Command::new(binary);
        cmd.args(flags)
            .env_remove(TARGET_ENV)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }

    /// Run `binary` with `flags` and wait for it
    ///
    /// # Errors
    /// `ExecError::SpawnError` if the binary cannot be started,
    /// `ExecError::CommandFailed` if it exits unsuccessfully.
    #[instrument(skip(self), level = "debug")]
    pub async fn run(&self, binary: &Path, flags: &[String]) -> Result<(), ExecError> {
        let start = Instant::now();

        let status = Self::command(binary, flags)
            .status()
            .await
            .map_err(|e| ExecError::SpawnError(format!("{}: {e}", binary.display())))?;

        let status = exit_status(status);
        debug!(
            binary = %binary.display(),
            status = %status,
            duration = ?start.elapsed(),
            "test binary completed"
        );

        if status.success() {
            Ok(())
        } else {
            error!(binary = %binary.display(), status = %status, "test binary failed");
            Err(ExecError::CommandFailed { status })
        }
    }
}

fn exit_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Code(code.cast_unsigned());
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus::Signal(signal.to_string());
        }
    }
    ExitStatus::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_run_success() {
        let runner = LocalRunner::new();
        runner.run(Path::new("sh"), &sh("exit 0")).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_failure() {
        let runner = LocalRunner::new();
        let err = runner.run(Path::new("sh"), &sh("exit 42")).await.unwrap_err();

        assert!(matches!(
            err,
            ExecError::CommandFailed {
                status: ExitStatus::Code(42)
            }
        ));
    }

    #[tokio::test]
    async fn test_run_missing_binary() {
        let runner = LocalRunner::new();
        let err = runner
            .run(Path::new("/nonexistent/pkg.test"), &[])
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::SpawnError(_)));
    }

    #[test]
    fn test_target_env_removed() {
        let cmd = LocalRunner::command(Path::new("pkg.test"), &["-test.v".to_string()]);
        let envs: Vec<_> = cmd.as_std().get_envs().collect();

        assert!(envs.contains(&(std::ffi::OsStr::new(TARGET_ENV), None)));
    }
}
