// ABOUTME: Test server error types.
// ABOUTME: Covers host key loading and listener setup failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no host key configured; set a key file or key bytes")]
    MissingHostKey,

    #[error("failed to load host key from {path}: {reason}")]
    HostKeyFile { path: PathBuf, reason: String },

    #[error("failed to parse host key: {0}")]
    HostKey(#[from] russh::keys::ssh_key::Error),

    #[error("cannot expand `~` in {0}: HOME is not set")]
    NoHomeDir(PathBuf),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
