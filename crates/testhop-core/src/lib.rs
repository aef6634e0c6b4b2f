//! testhop-core: Remote test execution pipeline
//!
//! Parses the host configuration, builds the connection profile and drives
//! the upload, run and coverage retrieval of a test binary on a remote host.

pub mod command;
pub mod error;
pub mod pipeline;
pub mod profile;
pub mod settings;
pub mod ssh_config;
pub mod state;

pub use command::{CoverageRewrite, Elevation};
pub use error::{ConfigError, ErrorKind, PipelineError, ProfileError, StageError};
pub use pipeline::{ExecutionRequest, ExecutionResult, RemoteExecutionPipeline};
pub use profile::{ConnectionProfileBuilder, DIAL_TIMEOUT, HostSelection};
pub use settings::{RunnerSettings, SettingsError};
pub use ssh_config::{HostProfile, HostProfiles};
pub use state::PipelineState;
