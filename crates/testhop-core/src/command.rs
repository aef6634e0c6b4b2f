//! Remote command line assembly and coverage flag rewriting

use std::path::{Path, PathBuf};

use testhop_exec::TARGET_ENV;

use crate::error::ConfigError;

/// Flag under which `go test -coverprofile` reaches the test binary
pub const COVERPROFILE_FLAG: &str = "-test.coverprofile";

/// A coverage profile requested by the test flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRewrite {
    /// Where the caller expects the profile, on this machine
    pub local: PathBuf,
    /// File name the remote binary writes, in its working directory
    pub remote: String,
}

impl CoverageRewrite {
    /// Find the first `-test.coverprofile=<path>` flag and point it at the
    /// remote working directory
    ///
    /// The flag is rewritten in place; no other flag is touched.
    ///
    /// # Errors
    /// `ConfigError::InvalidCoverProfile` when the path has no file name.
    pub fn apply(flags: &mut [String]) -> Result<Option<Self>, ConfigError> {
        let prefix = format!("{COVERPROFILE_FLAG}=");

        let Some((flag, local)) = flags.iter_mut().find_map(|flag| {
            let local = PathBuf::from(flag.strip_prefix(&prefix)?);
            if local.as_os_str().is_empty() {
                return None;
            }
            Some((flag, local))
        }) else {
            return Ok(None);
        };
        let remote = base_name(&local).ok_or_else(|| ConfigError::InvalidCoverProfile {
            path: local.display().to_string(),
        })?;

        *flag = format!("{prefix}{remote}");
        Ok(Some(Self { local, remote }))
    }
}

/// Last path component, as the remote working directory will know it
#[must_use]
pub fn base_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

/// How to run the remote command with elevated privileges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elevation {
    /// The elevation program, `sudo` by default
    pub program: String,
}

impl Default for Elevation {
    fn default() -> Self {
        Self {
            program: "sudo".to_string(),
        }
    }
}

/// Tokens of the remote command, before quoting
///
/// `TESTHOP_TARGET=<addr> [sudo --preserve-env=TESTHOP_TARGET] ./<binary> <flags...>`
#[must_use]
pub fn remote_command_tokens(
    target: &str,
    elevation: Option<&Elevation>,
    remote_binary: &str,
    flags: &[String],
) -> Vec<String> {
    let mut tokens = vec![format!("{TARGET_ENV}={target}")];
    if let Some(elevation) = elevation {
        tokens.push(elevation.program.clone());
        tokens.push(format!("--preserve-env={TARGET_ENV}"));
    }
    tokens.push(format!("./{remote_binary}"));
    tokens.extend(flags.iter().cloned());
    tokens
}

/// Join tokens into a shell command line, quoting each as needed
///
/// The environment assignment keeps its name unquoted so the remote shell
/// still treats it as an assignment.
#[must_use]
pub fn join_command(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| match token.split_once('=') {
            Some((name, value)) if name == TARGET_ENV => {
                format!("{name}={}", shell_words::quote(value))
            }
            _ => shell_words::quote(token).into_owned(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
