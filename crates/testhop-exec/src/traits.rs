//! Remote session and connector traits

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::ExecError;
use crate::result::ConnectionProfile;

/// Byte streams wired to a remote process for the duration of a command
pub struct Stdio {
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Stdio {
    /// The standard streams of the current process
    #[must_use]
    pub fn inherit() -> Self {
        Self {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }

    /// Wire custom streams
    pub fn new(
        stdin: impl AsyncRead + Send + Unpin + 'static,
        stdout: impl AsyncWrite + Send + Unpin + 'static,
        stderr: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }
}

impl fmt::Debug for Stdio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stdio").finish_non_exhaustive()
    }
}

/// One live connection to a remote host
///
/// Every channel an operation opens is closed before the operation returns.
#[async_trait]
pub trait RemoteSession: Send {
    /// Copy `local` into the remote working directory as `remote_name`
    async fn upload(&mut self, local: &Path, remote_name: &str, mode: u32)
    -> Result<(), ExecError>;

    /// Copy `remote_name` from the remote working directory to `local`
    async fn download(&mut self, remote_name: &str, local: &Path) -> Result<(), ExecError>;

    /// Run `command` with `stdio` attached, blocking until the remote process ends
    ///
    /// A non-zero exit is reported as `ExecError::CommandFailed`.
    async fn run(&mut self, command: &str, stdio: Stdio) -> Result<(), ExecError>;

    /// Disconnect
    async fn close(&mut self) -> Result<(), ExecError>;
}

/// Establishes sessions from a connection profile
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    /// Dial and authenticate
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Self::Session, ExecError>;
}
