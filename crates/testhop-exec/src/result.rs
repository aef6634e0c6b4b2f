//! Result and connection types for remote execution

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::PrivateKey;
use russh::keys::ssh_key::{HashAlg, PublicKey};

/// How a remote process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited with a status code
    Code(u32),
    /// Killed by a signal
    Signal(String),
    /// Channel closed without reporting a status
    Unknown,
}

impl ExitStatus {
    /// Check if the process exited with status 0
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit status {code}"),
            ExitStatus::Signal(signal) => write!(f, "killed by signal {signal}"),
            ExitStatus::Unknown => f.write_str("exited without status"),
        }
    }
}

/// Server host key verification policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any server key.
    ///
    /// Insecure: equivalent to `StrictHostKeyChecking no`. Only suitable for
    /// throwaway test machines (VMs, containers) reached over a trusted link.
    /// Use [`HostKeyPolicy::Fingerprints`] to pin the expected key instead.
    #[default]
    AcceptAny,
    /// Accept only keys whose SHA256 fingerprint (`SHA256:...`) is listed
    Fingerprints(Vec<String>),
}

impl HostKeyPolicy {
    /// Decide whether the server key is acceptable
    #[must_use]
    pub fn accepts(&self, key: &PublicKey) -> bool {
        match self {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::Fingerprints(allowed) => {
                let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
                allowed.iter().any(|f| f.trim() == fingerprint)
            }
        }
    }

    /// Whether this policy skips verification entirely
    #[must_use]
    pub fn is_insecure(&self) -> bool {
        matches!(self, HostKeyPolicy::AcceptAny)
    }
}

/// Validated, ready-to-dial connection parameters
#[derive(Clone)]
pub struct ConnectionProfile {
    /// `host:port`
    pub addr: String,
    /// Login user
    pub user: String,
    /// Signing credential for public key authentication
    pub key: Arc<PrivateKey>,
    /// Upper bound for TCP connect plus SSH handshake
    pub dial_timeout: Duration,
    /// How to verify the server key
    pub host_key_policy: HostKeyPolicy,
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("addr", &self.addr)
            .field("user", &self.user)
            .field("key", &self.key.algorithm())
            .field("dial_timeout", &self.dial_timeout)
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}
