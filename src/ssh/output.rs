// ABOUTME: Result values produced by remote command execution.
// ABOUTME: Results is an immutable snapshot; CommandError wraps a failed one.

use std::fmt;
use thiserror::Error;

/// Snapshot of a finished remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Results {
    exit_code: u32,
    stdout: String,
    stderr: String,
}

impl Results {
    pub fn new(exit_code: u32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub(crate) fn from_bytes(exit_code: u32, stdout: &[u8], stderr: &[u8]) -> Self {
        Self::new(
            exit_code,
            String::from_utf8_lossy(stdout),
            String::from_utf8_lossy(stderr),
        )
    }

    pub fn exit_code(&self) -> u32 {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// The exit code decides success; stderr content is informational.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a non-zero exit into a [`CommandError`].
    pub fn into_result(self) -> Result<Results, CommandError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CommandError {
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// A remote process ran but terminated with a non-zero status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CommandError {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandError {
    pub fn new(exit_code: u32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// The captured output of the failed command.
    pub fn results(&self) -> Results {
        Results::new(self.exit_code, self.stdout.clone(), self.stderr.clone())
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote command exited with status {}", self.exit_code)?;
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if !detail.is_empty() {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_with_stderr_is_success() {
        let results = Results::new(0, "", "warning: deprecated flag");
        assert!(results.success());
        assert_eq!(results.clone().into_result().unwrap(), results);
    }

    #[test]
    fn nonzero_exit_becomes_command_error() {
        let err = Results::new(23, "meh", "we have a failure to communicate")
            .into_result()
            .unwrap_err();
        assert_eq!(err.exit_code, 23);
        assert_eq!(err.stdout, "meh");
        assert_eq!(err.stderr, "we have a failure to communicate");
        assert_eq!(
            err.to_string(),
            "remote command exited with status 23: we have a failure to communicate"
        );
    }

    #[test]
    fn command_error_display_falls_back_to_stdout() {
        let err = CommandError::new(1, "scp: /root/x: Permission denied", "");
        assert_eq!(
            err.to_string(),
            "remote command exited with status 1: scp: /root/x: Permission denied"
        );
        assert_eq!(CommandError::new(2, "", "").to_string(), "remote command exited with status 2");
    }

    #[test]
    fn from_bytes_is_lossy() {
        let results = Results::from_bytes(0, b"ok\xff", b"");
        assert_eq!(results.stdout(), "ok\u{fffd}");
    }
}
