// ABOUTME: Test server configuration.
// ABOUTME: Listen address, credentials, host keys, and the command handler strategy.

use super::error::{Error, Result};
use super::handler::{CommandHandler, EchoHandler};
use russh::keys::{PrivateKey, load_secret_key, ssh_key};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Where a host key comes from.
#[derive(Clone)]
pub enum HostKeySource {
    /// OpenSSH private key file; a leading `~/` is expanded from `$HOME`.
    File(PathBuf),
    /// OpenSSH private key text.
    Bytes(Vec<u8>),
}

impl std::fmt::Debug for HostKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostKeySource::File(path) => f.debug_tuple("File").field(path).finish(),
            HostKeySource::Bytes(bytes) => write!(f, "Bytes(<{} bytes>)", bytes.len()),
        }
    }
}

impl HostKeySource {
    pub(crate) fn load(&self) -> Result<PrivateKey> {
        match self {
            HostKeySource::File(path) => {
                let path = expand_home(path)?;
                load_secret_key(&path, None).map_err(|e| Error::HostKeyFile {
                    path,
                    reason: e.to_string(),
                })
            }
            HostKeySource::Bytes(bytes) => Ok(PrivateKey::from_openssh(bytes)?),
        }
    }
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var_os("HOME").ok_or_else(|| Error::NoHomeDir(path.to_path_buf()))?;
            Ok(PathBuf::from(home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Channel requests the server can be told to refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusedRequest {
    /// Answer `pty-req` with a failure.
    Pty,
    /// Answer `exec` with a failure and leave the channel open.
    Exec,
}

/// Configuration for [`start`](super::start).
///
/// Password authentication is only offered when both a username and a
/// password are set. The comparison is a plain string equality and is not
/// constant-time; this server exists for tests.
#[derive(Clone)]
pub struct ServerConfig {
    pub hostname: String,
    /// `None` or `Some(0)` binds an ephemeral port.
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub authorized_keys: Vec<ssh_key::PublicKey>,
    pub host_keys: Vec<HostKeySource>,
    pub handler: Arc<dyn CommandHandler>,
    pub auth_rejection_time: Duration,
    pub refused: Vec<RefusedRequest>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("authorized_keys", &self.authorized_keys.len())
            .field("host_keys", &self.host_keys)
            .field("handler", &self.handler)
            .field("refused", &self.refused)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: None,
            username: None,
            password: None,
            authorized_keys: Vec::new(),
            host_keys: Vec::new(),
            handler: Arc::new(EchoHandler),
            auth_rejection_time: Duration::from_millis(50),
            refused: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Accept public key authentication for `username` with this key.
    pub fn authorized_key(mut self, key: ssh_key::PublicKey) -> Self {
        self.authorized_keys.push(key);
        self
    }

    pub fn key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_keys.push(HostKeySource::File(path.into()));
        self
    }

    pub fn key_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.host_keys.push(HostKeySource::Bytes(bytes.into()));
        self
    }

    pub fn handler(mut self, handler: impl CommandHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Answer `request` with a failure instead of handling it.
    pub fn refuse(mut self, request: RefusedRequest) -> Self {
        self.refused.push(request);
        self
    }

    pub(crate) fn refuses(&self, request: RefusedRequest) -> bool {
        self.refused.contains(&request)
    }

    pub(crate) fn listen_address(&self) -> String {
        format!("{}:{}", self.hostname, self.port.unwrap_or(0))
    }

    /// Whether a login attempt matches the configured credentials.
    pub(crate) fn password_matches(&self, user: &str, password: &str) -> bool {
        match (&self.username, &self.password) {
            (Some(expected_user), Some(expected)) if !expected.is_empty() => {
                user == expected_user && password == expected
            }
            _ => false,
        }
    }

    pub(crate) fn key_authorized(&self, user: &str, key: &ssh_key::PublicKey) -> bool {
        self.username.as_deref() == Some(user)
            && self
                .authorized_keys
                .iter()
                .any(|k| k.key_data() == key.key_data())
    }

    pub(crate) fn load_host_keys(&self) -> Result<Vec<PrivateKey>> {
        if self.host_keys.is_empty() {
            return Err(Error::MissingHostKey);
        }
        self.host_keys.iter().map(HostKeySource::load).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_localhost_ephemeral() {
        let config = ServerConfig::new();
        assert_eq!(config.listen_address(), "localhost:0");
    }

    #[test]
    fn password_requires_both_fields() {
        let config = ServerConfig::new().credentials("joebob", "howdy!");
        assert!(config.password_matches("joebob", "howdy!"));
        assert!(!config.password_matches("joebob", "nope"));
        assert!(!config.password_matches("alice", "howdy!"));

        let mut no_password = config.clone();
        no_password.password = None;
        assert!(!no_password.password_matches("joebob", "howdy!"));

        let empty = ServerConfig::new().credentials("joebob", "");
        assert!(!empty.password_matches("joebob", ""));
    }

    #[test]
    fn missing_host_key_is_an_error() {
        assert!(matches!(
            ServerConfig::new().load_host_keys(),
            Err(Error::MissingHostKey)
        ));
    }

    #[test]
    fn unreadable_key_file_names_the_path() {
        let config = ServerConfig::new().key_file("/nonexistent/host_key");
        match config.load_host_keys() {
            Err(Error::HostKeyFile { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/host_key"));
            }
            other => panic!("expected HostKeyFile error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_key_bytes_are_rejected() {
        let config = ServerConfig::new().key_bytes(b"not a key".to_vec());
        assert!(matches!(config.load_host_keys(), Err(Error::HostKey(_))));
    }

    #[test]
    fn refusals_are_opt_in() {
        let config = ServerConfig::new();
        assert!(!config.refuses(RefusedRequest::Pty));
        assert!(!config.refuses(RefusedRequest::Exec));

        let config = config.refuse(RefusedRequest::Pty);
        assert!(config.refuses(RefusedRequest::Pty));
        assert!(!config.refuses(RefusedRequest::Exec));
    }

    #[test]
    fn debug_hides_password() {
        let config = ServerConfig::new().credentials("joebob", "howdy!");
        assert!(!format!("{config:?}").contains("howdy"));
    }

    #[test]
    fn plain_paths_are_not_expanded() {
        assert_eq!(
            expand_home(Path::new("/etc/ssh/key")).unwrap(),
            PathBuf::from("/etc/ssh/key")
        );
    }
}
