//! Coordinator seal key on disk.
//!
//! The key is stored hex-encoded in a file only its owner can read. On Unix
//! the file is created with mode 0o600 and a key file readable or writable
//! by group or others is refused at load.

use fedrelay_crypto::{NodeSigner, SigningError};
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use zeroize::Zeroize;

#[derive(Debug, Error)]
pub enum KeyFileError {
    #[error("Key file {path} I/O error: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Key file {path} has mode {mode:o}, expected no group or other access")]
    Permissions { path: PathBuf, mode: u32 },

    #[error("Key file {0} is not valid hex")]
    Encoding(PathBuf),

    #[error("Invalid key: {0}")]
    Key(#[from] SigningError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> KeyFileError + '_ {
    move |source| KeyFileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load the key at `path`, or generate and persist a new one if absent
pub fn load_or_create_key(path: &Path) -> Result<NodeSigner, KeyFileError> {
    match load_key(path) {
        Err(KeyFileError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            create_key(path)
        }
        other => other,
    }
}

/// Load an existing key, refusing files with group or other permissions
pub fn load_key(path: &Path) -> Result<NodeSigner, KeyFileError> {
    let mut file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(io_error(path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = file.metadata().map_err(io_error(path))?.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Err(KeyFileError::Permissions {
                path: path.to_path_buf(),
                mode,
            });
        }
    }

    let mut encoded = String::new();
    let read = file.read_to_string(&mut encoded).map_err(io_error(path));
    let decoded = read.and_then(|_| {
        hex::decode(encoded.trim()).map_err(|_| KeyFileError::Encoding(path.to_path_buf()))
    });
    encoded.zeroize();

    let mut bytes = decoded?;
    let signer = NodeSigner::from_key(&bytes);
    bytes.zeroize();
    Ok(signer?)
}

/// Generate a key and write it to a new owner-only file at `path`
pub fn create_key(path: &Path) -> Result<NodeSigner, KeyFileError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut secret: [u8; 32] = rand::random();
    let mut encoded = hex::encode(secret);
    let written = options
        .open(path)
        .and_then(|mut file| {
            file.write_all(encoded.as_bytes())?;
            file.sync_all()
        })
        .map_err(io_error(path));
    encoded.zeroize();
    let signer = NodeSigner::from_key(&secret);
    secret.zeroize();

    written?;
    info!(path = %path.display(), "Generated coordinator key");
    Ok(signer?)
}
