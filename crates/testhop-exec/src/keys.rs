//! SSH private key loading

use std::path::{Path, PathBuf};

use russh::keys::{PrivateKey, decode_secret_key};
use tracing::{debug, warn};

/// Key loading errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    #[error("unable to read private key {}: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("unable to parse private key {}: {message}", path.display())]
    Unparsable { path: PathBuf, message: String },
}

/// Read and decode the private key at `path`
///
/// Encrypted keys are not supported, there is no one to ask for a passphrase
/// when running under a test driver.
///
/// # Errors
/// `KeyError::Unreadable` if the file cannot be read, `KeyError::Unparsable`
/// if its contents are not a private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKey, KeyError> {
    let bytes = std::fs::read(path).map_err(|e| KeyError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    warn_if_too_open(path);

    let text = String::from_utf8(bytes).map_err(|e| KeyError::Unparsable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let key = parse_private_key(&text).map_err(|e| match e {
        KeyError::Unparsable { message, .. } => KeyError::Unparsable {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })?;

    debug!(path = %path.display(), algorithm = %key.algorithm(), "loaded private key");
    Ok(key)
}

/// Decode an unencrypted private key (OpenSSH or PEM)
///
/// # Errors
/// Returns `KeyError::Unparsable` with an empty path.
pub fn parse_private_key(text: &str) -> Result<PrivateKey, KeyError> {
    decode_secret_key(text, None).map_err(|e| KeyError::Unparsable {
        path: PathBuf::new(),
        message: e.to_string(),
    })
}

#[cfg(unix)]
fn warn_if_too_open(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    // group and other bits
    if let Ok(metadata) = std::fs::metadata(path)
        && metadata.permissions().mode() & 0o77 != 0
    {
        warn!(path = %path.display(), "private key permissions too open (should be 600)");
    }
}

#[cfg(not(unix))]
fn warn_if_too_open(_path: &Path) {}
