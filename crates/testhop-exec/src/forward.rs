//! Stdio forwarding between the local process and a remote command
//!
//! Three tasks run while a remote command is alive: stdin is copied into the
//! channel, stdout and stderr chunks are queued by the channel reader and
//! written out locally. They are torn down together, either by
//! [`Forwarders::finish`] once the remote process has exited or by drop on
//! an error path.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use crate::traits::Stdio;

/// Chunks buffered per output stream before the channel reader waits
const QUEUE_DEPTH: usize = 64;

pub(crate) struct Forwarders {
    stdin: JoinHandle<()>,
    stdout: Option<mpsc::Sender<Vec<u8>>>,
    stderr: Option<mpsc::Sender<Vec<u8>>>,
    outputs: JoinSet<io::Result<()>>,
}

impl Forwarders {
    /// Start forwarding; `input` receives everything read from `stdio.stdin`
    pub(crate) fn spawn<W>(stdio: Stdio, input: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let Stdio {
            stdin,
            stdout,
            stderr,
        } = stdio;

        let stdin = tokio::spawn(pump_input(stdin, input));

        let mut outputs = JoinSet::new();
        let (stdout_tx, stdout_rx) = mpsc::channel(QUEUE_DEPTH);
        outputs.spawn(drain_output(stdout_rx, stdout));
        let (stderr_tx, stderr_rx) = mpsc::channel(QUEUE_DEPTH);
        outputs.spawn(drain_output(stderr_rx, stderr));

        Self {
            stdin,
            stdout: Some(stdout_tx),
            stderr: Some(stderr_tx),
            outputs,
        }
    }

    pub(crate) async fn stdout(&self, chunk: Vec<u8>) {
        if let Some(tx) = &self.stdout {
            // receiver gone means the local writer failed, reported by finish
            let _ = tx.send(chunk).await;
        }
    }

    pub(crate) async fn stderr(&self, chunk: Vec<u8>) {
        if let Some(tx) = &self.stderr {
            let _ = tx.send(chunk).await;
        }
    }

    /// Stop reading stdin, flush everything queued for stdout and stderr
    ///
    /// # Errors
    /// The first local write error of the output tasks.
    pub(crate) async fn finish(mut self) -> io::Result<()> {
        self.stdin.abort();
        self.stdout.take();
        self.stderr.take();

        while let Some(joined) = self.outputs.join_next().await {
            match joined {
                Ok(result) => result?,
                Err(e) if e.is_cancelled() => {}
                Err(e) => return Err(io::Error::other(e)),
            }
        }
        Ok(())
    }
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        self.stdin.abort();
        self.outputs.abort_all();
    }
}

async fn pump_input<R, W>(mut reader: R, writer: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite,
{
    let mut writer = Box::pin(writer);
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => debug!(bytes, "local stdin closed, sending EOF"),
        Err(e) => debug!(error = %e, "stdin forwarding stopped"),
    }
    let _ = writer.shutdown().await;
}

async fn drain_output<W>(mut rx: mpsc::Receiver<Vec<u8>>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = rx.recv().await {
        writer.write_all(&chunk).await?;
        writer.flush().await?;
    }
    writer.flush().await
}
