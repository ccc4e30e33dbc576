// ABOUTME: Application-wide error types for sshclient.
// ABOUTME: Wraps client and server errors alongside configuration failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid destination {input:?}: {reason}")]
    InvalidDestination { input: String, reason: String },

    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),

    #[error("test server error: {0}")]
    Server(#[from] crate::server::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Exit status of a remote command that failed, if that is what this is.
    pub fn remote_exit_code(&self) -> Option<u32> {
        match self {
            Error::Ssh(e) => e.as_command_error().map(|c| c.exit_code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
