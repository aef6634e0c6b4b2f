//! testhop-exec: Remote execution transport
//!
//! SSH sessions (russh) with SFTP file transfer and streamed command
//! execution, plus direct local execution of a test binary.

pub mod error;
mod forward;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;
mod transfer;

pub use error::ExecError;
pub use keys::{KeyError, load_private_key};
pub use local::LocalRunner;
pub use result::{ConnectionProfile, ExitStatus, HostKeyPolicy};
pub use ssh::{SshConnector, SshSession};
pub use traits::{Connector, RemoteSession, Stdio};

/// Environment variable holding the `host:port` of the remote target,
/// set for every remote run and never for a local one
pub const TARGET_ENV: &str = "TESTHOP_TARGET";
