//! Connection profile building and host selection

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use testhop_exec::{ConnectionProfile, HostKeyPolicy, load_private_key};

use crate::error::{ConfigError, ProfileError};
use crate::ssh_config::{HostProfile, HostProfiles};

/// Dial timeout, connect plus handshake
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Which `Host` block of the configuration file to use
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostSelection {
    /// The first block of the file
    #[default]
    First,
    /// The block with this `Host` value
    Named(String),
}

impl HostSelection {
    /// Pick a block from `profiles`
    ///
    /// # Errors
    /// `ConfigError::HostNotFound` for a name absent from the file.
    pub fn select<'a>(&self, profiles: &'a HostProfiles) -> Result<&'a HostProfile, ConfigError> {
        match self {
            HostSelection::First => Ok(profiles.first()),
            HostSelection::Named(name) => {
                profiles
                    .find(name)
                    .ok_or_else(|| ConfigError::HostNotFound { name: name.clone() })
            }
        }
    }
}

/// Builds a [`ConnectionProfile`] from a `Host` block
#[derive(Debug, Clone, Default)]
pub struct ConnectionProfileBuilder {
    host_key_policy: HostKeyPolicy,
}

impl ConnectionProfileBuilder {
    /// Builder with the insecure [`HostKeyPolicy::AcceptAny`] default
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the host key verification policy
    #[must_use]
    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Validate `host` and load its private key
    ///
    /// Required keys: `IdentityFile`, `User`, `StrictHostKeyChecking` (which
    /// must be `no`), `HostName`, `Port`. A relative `IdentityFile` is
    /// resolved against the current directory.
    ///
    /// # Errors
    /// `ProfileError::MissingKey`, `ProfileError::StrictHostKeyChecking`,
    /// `ProfileError::InvalidPort` or `ProfileError::Key`.
    pub fn build(&self, host: &HostProfile) -> Result<ConnectionProfile, ProfileError> {
        let required = |key| host.get(key).map_err(ProfileError::MissingKey);

        let identity_file = required("IdentityFile")?;
        let user = required("User")?;
        let strict_host_key_checking = required("StrictHostKeyChecking")?;
        if strict_host_key_checking != "no" {
            return Err(ProfileError::StrictHostKeyChecking(
                strict_host_key_checking.to_string(),
            ));
        }
        let host_name = required("HostName")?;
        let port = required("Port")?;
        port.parse::<u16>()
            .map_err(|_| ProfileError::InvalidPort(port.to_string()))?;

        let key = load_private_key(Path::new(identity_file))?;

        let profile = ConnectionProfile {
            addr: format!("{host_name}:{port}"),
            user: user.to_string(),
            key: Arc::new(key),
            dial_timeout: DIAL_TIMEOUT,
            host_key_policy: self.host_key_policy.clone(),
        };
        debug!(host = host.name(), ?profile, "built connection profile");
        Ok(profile)
    }
}
