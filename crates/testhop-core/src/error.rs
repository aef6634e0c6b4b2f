//! Core error types for testhop-core

use std::path::PathBuf;

use thiserror::Error;

use testhop_exec::{ExecError, KeyError};

use crate::state::PipelineState;

/// Errors reading or parsing the host configuration file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The file could not be read
    #[error("ssh_config {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    /// A line is not exactly `KEY VALUE`
    #[error("line '{line}': {count} tokens instead of 2")]
    TokenCount { line: String, count: usize },

    /// The first key of the file is not `Host`
    #[error("line '{line}': block must begin with 'Host'")]
    MissingHost { line: String },

    /// A key appears twice in one block
    #[error("block 'Host {host}': duplicated k/v: '{key} {value}', previous: '{key} {previous}'")]
    DuplicateKey {
        host: String,
        key: String,
        value: String,
        previous: String,
    },

    /// A block holds only its `Host` line
    #[error("empty block 'Host {host}'")]
    EmptyBlock { host: String },

    /// Two blocks share a `Host` value
    #[error("duplicated block 'Host {host}'")]
    DuplicateHost { host: String },

    /// No block at all
    #[error("empty file")]
    EmptyFile,

    /// A required key is absent from the selected block
    #[error("block 'Host {host}': missing key {key}")]
    MissingKey { host: String, key: String },

    /// The selection policy names a block that does not exist
    #[error("no block 'Host {name}'")]
    HostNotFound { name: String },

    /// A coverage profile path without a file name, such as `..`
    #[error("-test.coverprofile={path}: no file name")]
    InvalidCoverProfile { path: String },
}

/// Errors turning a host block into a connection profile
#[derive(Error, Debug, Clone)]
pub enum ProfileError {
    /// Required key absent
    #[error(transparent)]
    MissingKey(ConfigError),

    /// Host key checking requested, which is not supported by this profile builder
    #[error("StrictHostKeyChecking={0} but only 'no' is supported")]
    StrictHostKeyChecking(String),

    /// `Port` is not a TCP port number
    #[error("invalid Port '{0}'")]
    InvalidPort(String),

    /// Private key could not be loaded
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Failure class, one per stage family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ProfileValidation,
    Credential,
    Transport,
    Transfer,
    Execution,
}

/// The underlying cause of a pipeline failure
#[derive(Error, Debug, Clone)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// A pipeline failure, annotated with the state the pipeline was entering
#[derive(Error, Debug, Clone)]
#[error("{stage}: {source}")]
pub struct PipelineError {
    pub stage: PipelineState,
    #[source]
    pub source: StageError,
}

impl PipelineError {
    pub fn new(stage: PipelineState, source: impl Into<StageError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// Classify the failure
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match &self.source {
            StageError::Config(_) => ErrorKind::Configuration,
            StageError::Profile(ProfileError::Key(_)) => ErrorKind::Credential,
            StageError::Profile(_) => ErrorKind::ProfileValidation,
            StageError::Exec(e) if e.is_transport() => ErrorKind::Transport,
            StageError::Exec(e) if e.is_transfer() => ErrorKind::Transfer,
            StageError::Exec(_) => ErrorKind::Execution,
        }
    }
}
