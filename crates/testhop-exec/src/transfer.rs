//! File transfer over SFTP
//!
//! [`upload`] and [`download`] take the remote side as a future that opens
//! it, so opening the channel and the SFTP handshake count against the same
//! deadline as the bytes themselves.

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::client::fs::File as SftpFile;
use russh_sftp::protocol::FileAttributes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ExecError;

/// Files in the remote working directory
#[async_trait]
pub(crate) trait RemoteFiles: Send + Sync {
    type Writer: AsyncWrite + Unpin + Send;
    type Reader: AsyncRead + Unpin + Send;

    async fn create(&self, name: &str) -> io::Result<Self::Writer>;

    async fn set_mode(&self, name: &str, mode: u32) -> io::Result<()>;

    async fn open(&self, name: &str) -> io::Result<Self::Reader>;
}

#[async_trait]
impl RemoteFiles for SftpSession {
    type Writer = SftpFile;
    type Reader = SftpFile;

    async fn create(&self, name: &str) -> io::Result<SftpFile> {
        SftpSession::create(self, name).await.map_err(io::Error::other)
    }

    async fn set_mode(&self, name: &str, mode: u32) -> io::Result<()> {
        let mut attrs = FileAttributes::default();
        attrs.permissions = Some(mode);
        self.set_metadata(name, attrs)
            .await
            .map_err(io::Error::other)
    }

    async fn open(&self, name: &str) -> io::Result<SftpFile> {
        SftpSession::open(self, name).await.map_err(io::Error::other)
    }
}

async fn with_deadline<T>(
    operation: &'static str,
    deadline: Duration,
    transfer: impl Future<Output = Result<T, ExecError>>,
) -> Result<T, ExecError> {
    timeout(deadline, transfer)
        .await
        .map_err(|_| ExecError::Timeout {
            operation,
            timeout: deadline,
        })?
}

/// Copy `local` to `name` and set its permission bits to `mode`
pub(crate) async fn upload<F, Fut>(
    remote: Fut,
    local: &Path,
    name: &str,
    mode: u32,
    deadline: Duration,
) -> Result<u64, ExecError>
where
    F: RemoteFiles,
    Fut: Future<Output = Result<F, ExecError>>,
{
    let failed = |e: io::Error| ExecError::UploadFailed {
        name: name.to_string(),
        message: e.to_string(),
    };
    let file = tokio::fs::File::open(local)
        .await
        .map_err(|e| local_file_error(local, &e))?;

    let transfer = async {
        let files = remote.await?;
        let mut writer = files.create(name).await.map_err(failed)?;
        let bytes = tokio::io::copy(&mut BufReader::new(file), &mut writer)
            .await
            .map_err(failed)?;
        writer.shutdown().await.map_err(failed)?;
        drop(writer);

        files.set_mode(name, mode).await.map_err(failed)?;
        Ok(bytes)
    };

    let bytes = with_deadline("upload", deadline, transfer).await?;
    debug!(name, bytes, mode = %format_args!("{mode:04o}"), "upload complete");
    Ok(bytes)
}

/// Copy `name` to `local`; `local` is removed again if the copy fails
pub(crate) async fn download<F, Fut>(
    remote: Fut,
    name: &str,
    local: &Path,
    deadline: Duration,
) -> Result<u64, ExecError>
where
    F: RemoteFiles,
    Fut: Future<Output = Result<F, ExecError>>,
{
    let failed = |e: io::Error| ExecError::DownloadFailed {
        name: name.to_string(),
        message: e.to_string(),
    };
    let file = tokio::fs::File::create(local)
        .await
        .map_err(|e| local_file_error(local, &e))?;

    let transfer = async {
        let files = remote.await?;
        let mut reader = files.open(name).await.map_err(failed)?;
        let mut sink = BufWriter::new(file);
        let bytes = tokio::io::copy(&mut reader, &mut sink)
            .await
            .map_err(failed)?;
        sink.flush().await.map_err(failed)?;
        Ok(bytes)
    };

    match with_deadline("download", deadline, transfer).await {
        Ok(bytes) => {
            debug!(name, bytes, local = %local.display(), "download complete");
            Ok(bytes)
        }
        Err(e) => {
            // do not leave a truncated artifact behind
            if let Err(remove) = tokio::fs::remove_file(local).await {
                warn!(path = %local.display(), error = %remove, "failed to remove partial download");
            }
            Err(e)
        }
    }
}

fn local_file_error(path: &Path, e: &io::Error) -> ExecError {
    ExecError::LocalFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use tokio::io::{AsyncReadExt, DuplexStream, ReadBuf, duplex};

    /// Yields `prefix`, then fails like a connection dropped mid-transfer
    struct Interrupted {
        prefix: &'static [u8],
    }

    impl AsyncRead for Interrupted {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.prefix.is_empty() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "channel closed",
                )));
            }
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix = &self.prefix[n..];
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Default)]
    struct Recorded {
        uploaded: Option<DuplexStream>,
        modes: Vec<(String, u32)>,
    }

    /// In-memory remote working directory
    #[derive(Clone, Default)]
    struct MemoryFiles {
        recorded: Arc<Mutex<Recorded>>,
        /// Served by `open`; `None` means the file does not exist
        content: Option<&'static [u8]>,
        interrupt_download: bool,
    }

    #[async_trait]
    impl RemoteFiles for MemoryFiles {
        type Writer = DuplexStream;
        type Reader = Box<dyn AsyncRead + Unpin + Send>;

        async fn create(&self, _name: &str) -> io::Result<DuplexStream> {
            let (writer, reader) = duplex(64 * 1024);
            self.recorded.lock().unwrap().uploaded = Some(reader);
            Ok(writer)
        }

        async fn set_mode(&self, name: &str, mode: u32) -> io::Result<()> {
            self.recorded
                .lock()
                .unwrap()
                .modes
                .push((name.to_string(), mode));
            Ok(())
        }

        async fn open(&self, name: &str) -> io::Result<Self::Reader> {
            let content = self.content.ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{name}: no such file"))
            })?;
            if self.interrupt_download {
                return Ok(Box::new(Interrupted { prefix: content }));
            }
            Ok(Box::new(content))
        }
    }

    fn ready(files: &MemoryFiles) -> impl Future<Output = Result<MemoryFiles, ExecError>> {
        std::future::ready(Ok(files.clone()))
    }

    /// A server that accepted the connection but never answers the channel open
    fn stalled() -> impl Future<Output = Result<MemoryFiles, ExecError>> {
        std::future::pending()
    }

    const DEADLINE: Duration = Duration::from_secs(5);
    const SHORT_DEADLINE: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_upload_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("pkg.test");
        std::fs::write(&local, b"\x7fELF test binary").unwrap();

        let files = MemoryFiles::default();
        let bytes = upload(ready(&files), &local, "pkg.test", 0o755, DEADLINE)
            .await
            .unwrap();
        assert_eq!(bytes, 16);

        let mut recorded = std::mem::take(&mut *files.recorded.lock().unwrap());
        let mut content = Vec::new();
        recorded
            .uploaded
            .take()
            .unwrap()
            .read_to_end(&mut content)
            .await
            .unwrap();
        assert_eq!(content, b"\x7fELF test binary");
        assert_eq!(recorded.modes, vec![("pkg.test".to_string(), 0o755)]);
    }

    #[tokio::test]
    async fn test_upload_missing_local_file() {
        let err = upload(
            ready(&MemoryFiles::default()),
            Path::new("/nonexistent/pkg.test"),
            "pkg.test",
            0o755,
            DEADLINE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::LocalFile { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_upload_deadline_covers_channel_open() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("pkg.test");
        std::fs::write(&local, b"binary").unwrap();

        let err = upload(stalled(), &local, "pkg.test", 0o755, SHORT_DEADLINE)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExecError::Timeout { operation: "upload", .. }),
            "{err}"
        );
        assert!(err.is_transfer());
    }

    #[tokio::test]
    async fn test_download() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("cov.out");
        let files = MemoryFiles {
            content: Some(b"mode: set\n"),
            ..Default::default()
        };

        let bytes = download(ready(&files), "cov.out", &local, DEADLINE)
            .await
            .unwrap();
        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&local).unwrap(), b"mode: set\n");
    }

    #[tokio::test]
    async fn test_download_missing_remote_file_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("cov.out");

        let err = download(ready(&MemoryFiles::default()), "cov.out", &local, DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::DownloadFailed { .. }), "{err}");
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_interrupted_download_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("cov.out");
        let files = MemoryFiles {
            content: Some(b"mode: set\npkg/a.go:1.1,2.2 1 1\n"),
            interrupt_download: true,
            ..Default::default()
        };

        let err = download(ready(&files), "cov.out", &local, DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::DownloadFailed { .. }), "{err}");
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_timed_out_download_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("cov.out");

        let err = download(stalled(), "cov.out", &local, SHORT_DEADLINE)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExecError::Timeout { operation: "download", .. }),
            "{err}"
        );
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_download_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("missing/cov.out");

        let err = download(ready(&MemoryFiles::default()), "cov.out", &local, DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::LocalFile { .. }), "{err}");
    }
}
