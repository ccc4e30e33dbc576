// ABOUTME: SSH client error types.
// ABOUTME: Separates connection, terminal, command, timeout, and transfer failures.

use super::output::CommandError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed for user {0}")]
    AuthenticationFailed(String),

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("request for pseudo terminal failed: {0}")]
    Terminal(String),

    #[error("remote refused the exec request")]
    ExecRejected,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("command timed out after {0:?}; the remote command may still be running")]
    CommandTimeout(std::time::Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("session is closed")]
    SessionClosed,

    #[error("command worker terminated without reporting a result")]
    WorkerLost,

    #[error("transfer of {path} failed: {source}")]
    Transfer {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the remote command failure, if this error carries one.
    pub fn as_command_error(&self) -> Option<&CommandError> {
        match self {
            Error::Command(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::CommandTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
