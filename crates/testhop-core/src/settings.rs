//! Runner settings loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::Elevation;

/// Environment variable naming a settings file
pub const SETTINGS_ENV: &str = "TESTHOP_SETTINGS";

/// Errors loading a settings file
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("settings {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Tuning knobs for remote execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSettings {
    /// Deadline for each file transfer, in seconds
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    /// Deadline for the remote test binary, in seconds; unbounded when unset
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    /// Program used by `--sudo`
    #[serde(default = "default_elevation_command")]
    pub elevation_command: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            transfer_timeout_secs: default_transfer_timeout_secs(),
            command_timeout_secs: None,
            elevation_command: default_elevation_command(),
        }
    }
}

fn default_transfer_timeout_secs() -> u64 {
    5
}

fn default_elevation_command() -> String {
    "sudo".to_string()
}

impl RunnerSettings {
    #[must_use]
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn elevation(&self) -> Elevation {
        Elevation {
            program: self.elevation_command.clone(),
        }
    }

    /// Load settings from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `$TESTHOP_SETTINGS` or the default paths, or use defaults
    ///
    /// # Errors
    /// Returns error if a settings file exists but cannot be read or parsed
    pub fn load_default() -> Result<Self, SettingsError> {
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            return Self::load(&PathBuf::from(path));
        }

        let paths = [
            Some(PathBuf::from("testhop.toml")),
            dirs::config_dir().map(|p| p.join("testhop/testhop.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading settings");
                return Self::load(&path);
            }
        }

        Ok(Self::default())
    }
}
