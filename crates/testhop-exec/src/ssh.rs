//! SSH sessions using russh crate, file transfer over the sftp subsystem

use std::io;
use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key::{self, HashAlg};
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecError;
use crate::forward::Forwarders;
use crate::result::{ConnectionProfile, ExitStatus, HostKeyPolicy};
use crate::traits::{Connector, RemoteSession, Stdio};
use crate::transfer;

/// Default deadline for a single file transfer
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    policy: HostKeyPolicy,
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let accepted = self.policy.accepts(server_public_key);
        if !accepted {
            error!(
                fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
                "server host key not in the accepted fingerprints"
            );
        }
        Ok(accepted)
    }
}

/// Dials SSH sessions
#[derive(Debug, Clone)]
pub struct SshConnector {
    transfer_timeout: Duration,
    command_timeout: Option<Duration>,
}

impl SshConnector {
    /// Create a connector with the default transfer deadline and no command timeout
    #[must_use]
    pub fn new() -> Self {
        Self {
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            command_timeout: None,
        }
    }

    /// Set the per-transfer deadline
    #[must_use]
    pub fn with_transfer_timeout(mut self, transfer_timeout: Duration) -> Self {
        self.transfer_timeout = transfer_timeout;
        self
    }

    /// Bound remote command execution; `None` waits as long as the command runs
    #[must_use]
    pub fn with_command_timeout(mut self, command_timeout: Option<Duration>) -> Self {
        self.command_timeout = command_timeout;
        self
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    #[instrument(skip(self, profile), fields(addr = %profile.addr))]
    async fn connect(&self, profile: &ConnectionProfile) -> Result<SshSession, ExecError> {
        if profile.host_key_policy.is_insecure() {
            warn!(addr = %profile.addr, "host key verification disabled (StrictHostKeyChecking no)");
        }
        info!(addr = %profile.addr, user = %profile.user, "connecting to SSH");

        let config = Arc::new(client::Config::default());
        let handler = SshClientHandler {
            policy: profile.host_key_policy.clone(),
        };

        let establish = async {
            let mut handle = client::connect(config, profile.addr.as_str(), handler)
                .await
                .map_err(|e| ExecError::ConnectionFailed(format!("{}: {e}", profile.addr)))?;

            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();
            let auth_res = handle
                .authenticate_publickey(
                    &profile.user,
                    PrivateKeyWithHashAlg::new(Arc::clone(&profile.key), hash_alg),
                )
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

            if !auth_res.success() {
                return Err(ExecError::AuthenticationFailed(format!(
                    "public key rejected for user {}",
                    profile.user
                )));
            }
            Ok(handle)
        };

        // the dial timeout covers TCP connect, key exchange and authentication
        let handle = timeout(profile.dial_timeout, establish)
            .await
            .map_err(|_| ExecError::DialTimeout {
                addr: profile.addr.clone(),
                timeout: profile.dial_timeout,
            })??;

        info!(addr = %profile.addr, "SSH connected and authenticated");

        Ok(SshSession {
            addr: profile.addr.clone(),
            handle: Some(handle),
            transfer_timeout: self.transfer_timeout,
            command_timeout: self.command_timeout,
        })
    }
}

/// An authenticated SSH connection
///
/// Dropping the session tears the connection down; [`RemoteSession::close`]
/// does it politely.
pub struct SshSession {
    addr: String,
    handle: Option<client::Handle<SshClientHandler>>,
    transfer_timeout: Duration,
    command_timeout: Option<Duration>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("addr", &self.addr)
            .field("connected", &self.handle.is_some())
            .field("transfer_timeout", &self.transfer_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl SshSession {
    fn handle(&self, purpose: &'static str) -> Result<&client::Handle<SshClientHandler>, ExecError> {
        self.handle.as_ref().ok_or_else(|| ExecError::ChannelFailed {
            purpose,
            message: "session already closed".to_string(),
        })
    }

    /// Open a session channel and start `command` on it
    async fn open_exec(&self, command: &str) -> Result<russh::Channel<client::Msg>, ExecError> {
        let failed = |e: russh::Error| ExecError::ChannelFailed {
            purpose: "exec",
            message: e.to_string(),
        };
        let channel = self
            .handle("exec")?
            .channel_open_session()
            .await
            .map_err(failed)?;
        channel.exec(true, command).await.map_err(failed)?;
        Ok(channel)
    }

    /// Open a session channel running the sftp subsystem
    async fn open_sftp(&self) -> Result<SftpSession, ExecError> {
        let failed = |message: String| ExecError::ChannelFailed {
            purpose: "sftp",
            message,
        };
        let channel = self
            .handle("sftp")?
            .channel_open_session()
            .await
            .map_err(|e| failed(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| failed(e.to_string()))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| failed(e.to_string()))
    }
}

/// Forward channel output until the remote process is gone, returning how it ended
async fn relay_until_exit<S>(mut messages: S, forwarders: &Forwarders) -> ExitStatus
where
    S: Stream<Item = ChannelMsg> + Unpin,
{
    let mut status = ExitStatus::Unknown;
    while let Some(msg) = messages.next().await {
        match msg {
            ChannelMsg::Data { data } => forwarders.stdout(data.to_vec()).await,
            ChannelMsg::ExtendedData { data, ext: 1 } => {
                forwarders.stderr(data.to_vec()).await;
            }
            ChannelMsg::ExitStatus { exit_status } => {
                status = ExitStatus::Code(exit_status);
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                status = ExitStatus::Signal(format!("{signal_name:?}"));
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    status
}

/// A run succeeds only if the remote process did and all of its output arrived
fn run_outcome(status: ExitStatus, forwarded: io::Result<()>) -> Result<(), ExecError> {
    if !status.success() {
        return Err(ExecError::CommandFailed { status });
    }
    forwarded.map_err(|e| ExecError::IoError(format!("forwarding remote output: {e}")))
}

#[async_trait]
impl RemoteSession for SshSession {
    #[instrument(skip(self), fields(addr = %self.addr))]
    async fn upload(
        &mut self,
        local: &Path,
        remote_name: &str,
        mode: u32,
    ) -> Result<(), ExecError> {
        debug!(local = %local.display(), remote_name, "sftp host -> target");
        transfer::upload(
            self.open_sftp(),
            local,
            remote_name,
            mode,
            self.transfer_timeout,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(addr = %self.addr))]
    async fn download(&mut self, remote_name: &str, local: &Path) -> Result<(), ExecError> {
        debug!(remote_name, local = %local.display(), "sftp target -> host");
        transfer::download(self.open_sftp(), remote_name, local, self.transfer_timeout).await?;
        Ok(())
    }

    #[instrument(skip(self, stdio), fields(addr = %self.addr))]
    async fn run(&mut self, command: &str, stdio: Stdio) -> Result<(), ExecError> {
        debug!(command = %command, "executing remote command");
        let mut channel = self.open_exec(command).await?;
        let forwarders = Forwarders::spawn(stdio, channel.make_writer());

        let outcome = {
            let messages = pin!(stream::unfold(&mut channel, |channel| async move {
                channel.wait().await.map(|msg| (msg, channel))
            }));
            let relay = relay_until_exit(messages, &forwarders);
            match self.command_timeout {
                Some(limit) => timeout(limit, relay).await.map_err(|_| limit),
                None => Ok(relay.await),
            }
        };
        let _ = channel.close().await;

        let status = match outcome {
            Ok(status) => status,
            Err(limit) => {
                error!(command = %command, timeout = ?limit, "remote command timed out");
                return Err(ExecError::Timeout {
                    operation: "command",
                    timeout: limit,
                });
            }
        };
        let forwarded = forwarders.finish().await;

        debug!(command = %command, status = %status, "remote command completed");
        run_outcome(status, forwarded)
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(addr = %self.addr, "SSH disconnected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncReadExt;

    use crate::keys::parse_private_key;

    const FIXTURE_KEY: &str = include_str!("../../testhop-core/tests/fixtures/id_ed25519");

    fn profile(addr: &str) -> ConnectionProfile {
        ConnectionProfile {
            addr: addr.to_string(),
            user: "tester".to_string(),
            key: Arc::new(parse_private_key(FIXTURE_KEY).unwrap()),
            dial_timeout: Duration::from_secs(1),
            host_key_policy: HostKeyPolicy::AcceptAny,
        }
    }

    fn quiet_forwarders() -> Forwarders {
        Forwarders::spawn(
            Stdio::new(tokio::io::empty(), tokio::io::sink(), tokio::io::sink()),
            tokio::io::sink(),
        )
    }

    #[tokio::test]
    async fn test_relay_exit_status_and_output() {
        let (stdout, mut stdout_peer) = tokio::io::duplex(1024);
        let (stderr, mut stderr_peer) = tokio::io::duplex(1024);
        let forwarders = Forwarders::spawn(
            Stdio::new(tokio::io::empty(), stdout, stderr),
            tokio::io::sink(),
        );
        let messages = stream::iter(vec![
            ChannelMsg::Data {
                data: (&b"--- PASS: TestA\n"[..]).into(),
            },
            ChannelMsg::ExtendedData {
                data: (&b"warning\n"[..]).into(),
                ext: 1,
            },
            ChannelMsg::ExitStatus { exit_status: 3 },
            ChannelMsg::Eof,
            ChannelMsg::Close,
        ]);

        let status = relay_until_exit(messages, &forwarders).await;
        assert_eq!(status, ExitStatus::Code(3));
        forwarders.finish().await.unwrap();

        let mut out = String::new();
        stdout_peer.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "--- PASS: TestA\n");
        let mut err = String::new();
        stderr_peer.read_to_string(&mut err).await.unwrap();
        assert_eq!(err, "warning\n");
    }

    #[tokio::test]
    async fn test_relay_exit_signal() {
        let forwarders = quiet_forwarders();
        let messages = stream::iter(vec![
            ChannelMsg::ExitSignal {
                signal_name: russh::Sig::KILL,
                core_dumped: false,
                error_message: String::new(),
                lang_tag: String::new(),
            },
            ChannelMsg::Close,
        ]);

        let status = relay_until_exit(messages, &forwarders).await;
        assert_eq!(status, ExitStatus::Signal("KILL".to_string()));
        assert!(matches!(
            run_outcome(status, Ok(())),
            Err(ExecError::CommandFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_relay_close_without_status() {
        let forwarders = quiet_forwarders();

        let status = relay_until_exit(stream::iter(vec![ChannelMsg::Close]), &forwarders).await;
        assert_eq!(status, ExitStatus::Unknown);
        assert!(matches!(
            run_outcome(status, Ok(())),
            Err(ExecError::CommandFailed {
                status: ExitStatus::Unknown
            })
        ));

        // connection dropped before any close message
        let status = relay_until_exit(stream::iter(Vec::new()), &forwarders).await;
        assert_eq!(status, ExitStatus::Unknown);
    }

    #[test]
    fn test_run_outcome_reports_lost_output() {
        assert!(run_outcome(ExitStatus::Code(0), Ok(())).is_ok());

        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed");
        let err = run_outcome(ExitStatus::Code(0), Err(broken)).unwrap_err();
        assert!(matches!(err, ExecError::IoError(ref m) if m.contains("stdout closed")), "{err}");

        // the exit status wins over a forwarding failure
        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed");
        let err = run_outcome(ExitStatus::Code(1), Err(broken)).unwrap_err();
        assert!(matches!(err, ExecError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = SshConnector::new().connect(&profile(&addr)).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_dial_timeout_on_silent_server() {
        // accepts TCP but never speaks SSH
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let err = SshConnector::new().connect(&profile(&addr)).await.unwrap_err();
        assert!(matches!(err, ExecError::DialTimeout { .. }), "unexpected error: {err}");
    }

    #[tokio::test]
    #[ignore = "requires SSH server at TESTHOP_TEST_ADDR"]
    async fn test_run_against_server() {
        let addr = std::env::var("TESTHOP_TEST_ADDR").unwrap();
        let mut session = SshConnector::new().connect(&profile(&addr)).await.unwrap();
        session
            .run(
                "true",
                Stdio::new(tokio::io::empty(), tokio::io::sink(), tokio::io::sink()),
            )
            .await
            .unwrap();
        session.close().await.unwrap();
    }
}
