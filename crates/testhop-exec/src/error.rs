//! Error types for testhop-exec

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::result::ExitStatus;

/// Errors that can occur while talking to the remote host
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Dial did not complete in time
    #[error("dial {addr} timed out after {timeout:?}")]
    DialTimeout {
        /// Address being dialed
        addr: String,
        /// Dial timeout that was exceeded
        timeout: Duration,
    },

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Could not open a channel on an established connection
    #[error("open {purpose} channel: {message}")]
    ChannelFailed {
        /// What the channel was for (sftp, exec)
        purpose: &'static str,
        /// Underlying error
        message: String,
    },

    /// Local side of a transfer could not be opened or created
    #[error("local file {}: {message}", path.display())]
    LocalFile {
        /// Local path
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Copying a file to the remote host failed
    #[error("upload {name}: {message}")]
    UploadFailed {
        /// Remote file name
        name: String,
        /// Underlying error
        message: String,
    },

    /// Copying a file from the remote host failed
    #[error("download {name}: {message}")]
    DownloadFailed {
        /// Remote file name
        name: String,
        /// Underlying error
        message: String,
    },

    /// Test binary terminated abnormally, locally or on the remote host
    #[error("command failed: {status}")]
    CommandFailed {
        /// How the remote process ended
        status: ExitStatus,
    },

    /// Operation timed out
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that did not finish (upload, download, command)
        operation: &'static str,
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),
}

impl ExecError {
    /// Whether the error happened before any byte reached the remote host
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed(_)
                | ExecError::DialTimeout { .. }
                | ExecError::AuthenticationFailed(_)
                | ExecError::ChannelFailed { .. }
        )
    }

    /// Whether the error belongs to a file transfer
    #[must_use]
    pub fn is_transfer(&self) -> bool {
        match self {
            ExecError::LocalFile { .. }
            | ExecError::UploadFailed { .. }
            | ExecError::DownloadFailed { .. } => true,
            ExecError::Timeout { operation, .. } => *operation != "command",
            _ => false,
        }
    }
}
