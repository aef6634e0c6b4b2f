//! `RemoteExecutionPipeline`: run one test binary on a remote host
//!
//! Strictly sequential: rewrite the coverage flag, parse the host
//! configuration, build the connection profile, connect, upload the binary,
//! run it with the caller's stdio attached, fetch the coverage profile if one
//! was requested. The first
//! failure stops the pipeline; the connection is closed on every path once
//! it exists.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use testhop_exec::{Connector, ExecError, RemoteSession, Stdio};

use crate::command::{
    CoverageRewrite, Elevation, base_name, join_command, remote_command_tokens,
};
use crate::error::PipelineError;
use crate::profile::{ConnectionProfileBuilder, HostSelection};
use crate::ssh_config::HostProfiles;
use crate::state::PipelineState;

/// What to run
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Local path of the compiled test binary
    pub test_binary: PathBuf,
    /// Flags for the test binary, in order
    pub test_flags: Vec<String>,
    /// Run the binary with elevated privileges
    pub elevate: bool,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Local coverage profile fetched from the remote host
    pub coverage: Option<PathBuf>,
}

/// Drives one remote execution through [`PipelineState`]
pub struct RemoteExecutionPipeline<C> {
    connector: C,
    selection: HostSelection,
    profile_builder: ConnectionProfileBuilder,
    elevation: Elevation,
    state: PipelineState,
}

impl<C: Connector> RemoteExecutionPipeline<C> {
    /// Pipeline using the first `Host` block and the insecure host key default
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            selection: HostSelection::default(),
            profile_builder: ConnectionProfileBuilder::new(),
            elevation: Elevation::default(),
            state: PipelineState::Idle,
        }
    }

    #[must_use]
    pub fn with_selection(mut self, selection: HostSelection) -> Self {
        self.selection = selection;
        self
    }

    #[must_use]
    pub fn with_profile_builder(mut self, profile_builder: ConnectionProfileBuilder) -> Self {
        self.profile_builder = profile_builder;
        self
    }

    #[must_use]
    pub fn with_elevation(mut self, elevation: Elevation) -> Self {
        self.elevation = elevation;
        self
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }

    /// Run `request` on the host described by the `ssh_config` file
    ///
    /// # Errors
    /// The first failure, annotated with the state the pipeline was entering.
    pub async fn execute(
        &mut self,
        ssh_config: &Path,
        request: ExecutionRequest,
        stdio: Stdio,
    ) -> Result<ExecutionResult, PipelineError> {
        debug!(
            ssh_config = %ssh_config.display(),
            test_binary = %request.test_binary.display(),
            test_flags = ?request.test_flags,
            "remote execution"
        );
        self.state = PipelineState::Idle;

        let result = self.connect_and_run(ssh_config, request, stdio).await;
        match &result {
            Ok(outcome) => {
                self.advance(PipelineState::Done);
                info!(coverage = ?outcome.coverage, "remote execution succeeded");
            }
            Err(e) => {
                error!(stage = %e.stage, error = %e.source, "remote execution failed");
                self.advance(PipelineState::Failed);
            }
        }
        result
    }

    async fn connect_and_run(
        &mut self,
        ssh_config: &Path,
        mut request: ExecutionRequest,
        stdio: Stdio,
    ) -> Result<ExecutionResult, PipelineError> {
        let coverage = CoverageRewrite::apply(&mut request.test_flags)
            .map_err(|e| PipelineError::new(PipelineState::ConfigParsed, e))?;
        if let Some(coverage) = &coverage {
            debug!(local = %coverage.local.display(), remote = %coverage.remote, "rewrote coverprofile");
        }

        let profiles = HostProfiles::load(ssh_config)
            .map_err(|e| PipelineError::new(PipelineState::ConfigParsed, e))?;
        // Only one target per invocation; the policy decides which block.
        let host = self
            .selection
            .select(&profiles)
            .map_err(|e| PipelineError::new(PipelineState::ConfigParsed, e))?;
        self.advance(PipelineState::ConfigParsed);

        let profile = self
            .profile_builder
            .build(host)
            .map_err(|e| PipelineError::new(PipelineState::ConnectionReady, e))?;
        self.advance(PipelineState::ConnectionReady);

        let mut session = self
            .connector
            .connect(&profile)
            .await
            .map_err(|e| PipelineError::new(PipelineState::Connected, e))?;
        self.advance(PipelineState::Connected);

        let outcome = self
            .run_on(&mut session, &profile.addr, request, coverage, stdio)
            .await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "failed to close SSH connection");
        }
        outcome
    }

    async fn run_on(
        &mut self,
        session: &mut C::Session,
        target: &str,
        request: ExecutionRequest,
        coverage: Option<CoverageRewrite>,
        stdio: Stdio,
    ) -> Result<ExecutionResult, PipelineError> {
        let ExecutionRequest {
            test_binary,
            test_flags,
            elevate,
        } = request;

        let uploading = |e: ExecError| PipelineError::new(PipelineState::BinaryUploaded, e);
        let remote_binary = base_name(&test_binary).ok_or_else(|| {
            uploading(ExecError::LocalFile {
                path: test_binary.clone(),
                message: "not a file name".to_string(),
            })
        })?;
        let mode = upload_mode(&test_binary).map_err(uploading)?;
        session
            .upload(&test_binary, &remote_binary, mode)
            .await
            .map_err(uploading)?;
        self.advance(PipelineState::BinaryUploaded);

        let elevation = elevate.then_some(&self.elevation);
        let command = join_command(&remote_command_tokens(
            target,
            elevation,
            &remote_binary,
            &test_flags,
        ));
        session
            .run(&command, stdio)
            .await
            .map_err(|e| PipelineError::new(PipelineState::Executed, e))?;
        self.advance(PipelineState::Executed);

        let Some(coverage) = coverage else {
            return Ok(ExecutionResult::default());
        };
        session
            .download(&coverage.remote, &coverage.local)
            .await
            .map_err(|e| PipelineError::new(PipelineState::CoverageRetrieved, e))?;
        self.advance(PipelineState::CoverageRetrieved);

        Ok(ExecutionResult {
            coverage: Some(coverage.local),
        })
    }
}

/// `0755` when the local binary is executable by anyone, `0644` otherwise
fn upload_mode(path: &Path) -> Result<u32, ExecError> {
    let metadata = std::fs::metadata(path).map_err(|e| ExecError::LocalFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(if is_executable(&metadata) { 0o755 } else { 0o644 })
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    true
}
