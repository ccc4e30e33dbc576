// ABOUTME: Authenticated SSH connections using russh.
// ABOUTME: Handles dialing with a timeout, host key policy, and authentication.

use super::error::{Error, Result};
use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{Channel, Disconnect};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const DEFAULT_PORT: u16 = 22;

/// How the client proves its identity.
#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Key(Arc<PrivateKey>),
    /// Offer every identity held by the agent at `SSH_AUTH_SOCK`.
    Agent,
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::KeyFile { path, .. } => {
                f.debug_struct("KeyFile").field("path", path).finish()
            }
            AuthMethod::Key(_) => f.write_str("Key(<private key>)"),
            AuthMethod::Agent => f.write_str("Agent"),
        }
    }
}

/// What to do with the server's host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Only accept hosts already present in known_hosts.
    KnownHosts { path: Option<PathBuf> },
    /// Accept and record unknown hosts; still reject changed keys.
    TrustOnFirstUse { path: Option<PathBuf> },
    /// Accept any key. Only meant for loopback test servers.
    AcceptAny,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::KnownHosts { path: None }
    }
}

/// Configuration for establishing a connection.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: AuthMethod,
    pub host_key_policy: HostKeyPolicy,
    /// Limit on dial plus key exchange.
    pub connect_timeout: Duration,
}

impl ConnectConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, auth: AuthMethod) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            auth,
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Build from a `host[:port]` address; IPv6 literals go in brackets.
    pub fn from_address(
        address: &str,
        user: impl Into<String>,
        auth: AuthMethod,
    ) -> Result<Self> {
        let (host, port) = parse_address(address)?;
        Ok(Self::new(host, user, auth).port(port))
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Split `host[:port]` into its parts.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let invalid = |reason: &str| Error::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };
    let address = address.trim();

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated '['"))?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(invalid("unexpected text after ']'")),
        }
    } else {
        match address.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => (address, None),
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("hostname cannot be empty"));
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| invalid(&format!("invalid port: {port}")))?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}

/// russh client callbacks.
pub(crate) struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let (path, learn) = match &self.policy {
            HostKeyPolicy::AcceptAny => return Ok(true),
            HostKeyPolicy::KnownHosts { path } => (path, false),
            HostKeyPolicy::TrustOnFirstUse { path } => (path, true),
        };

        let check_result = match path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) if learn => {
                tracing::warn!(
                    host = %self.host,
                    port = self.port,
                    "trust-on-first-use: accepting unknown host key"
                );
                let learn_result = match path {
                    Some(path) => {
                        learn_known_hosts_path(&self.host, self.port, server_public_key, path)
                    }
                    None => learn_known_hosts(&self.host, self.port, server_public_key),
                };
                if let Err(e) = learn_result {
                    tracing::warn!("failed to save host key to known_hosts: {}", e);
                }
                Ok(true)
            }
            Ok(false) => {
                tracing::warn!(host = %self.host, port = self.port, "unknown host key rejected");
                Ok(false)
            }
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::warn!(host = %self.host, "host key does not match known_hosts entry");
                Ok(false)
            }
            Err(e) => {
                tracing::debug!("known_hosts lookup failed: {}", e);
                Ok(learn)
            }
        }
    }
}

struct Inner {
    handle: Handle<ClientHandler>,
    address: String,
    closed: AtomicBool,
}

/// An authenticated transport connection.
///
/// Clones share the same transport; [`Connection::close`] releases it once
/// no matter how many clones call it.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.address)
            .field("closed", &self.is_closed())
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Connection {
    /// Dial, exchange keys, and authenticate.
    pub async fn connect(config: &ConnectConfig) -> Result<Self> {
        let address = config.address();
        let russh_config = Config {
            // Commands may stay silent for long stretches.
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };
        let handler = ClientHandler {
            host: config.host.clone(),
            port: config.port,
            policy: config.host_key_policy.clone(),
        };

        tracing::debug!(%address, user = %config.user, "dialing");
        let dial = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            handler,
        );
        let mut handle = match tokio::time::timeout(config.connect_timeout, dial).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(if e.to_string().contains("Connection refused") {
                    Error::Connection(format!("connection refused to {address}"))
                } else {
                    Error::Connection(format!("failed to dial {address}: {e}"))
                });
            }
            Err(_) => {
                return Err(Error::Connection(format!(
                    "timed out after {:?} dialing {address}",
                    config.connect_timeout
                )));
            }
        };

        if !authenticate(&mut handle, config).await? {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(Error::AuthenticationFailed(config.user.clone()));
        }
        tracing::debug!(%address, user = %config.user, "authenticated");

        Ok(Self {
            inner: Arc::new(Inner {
                handle,
                address,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        if self.is_closed() {
            return Err(Error::Connection(format!(
                "connection to {} is closed",
                self.inner.address
            )));
        }
        self.inner
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Connection(format!("failed to open session channel: {e}")))
    }

    /// Disconnect the transport. Later calls are no-ops.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(address = %self.inner.address, "disconnecting");
        // The peer may already have gone away; nothing is left to release then.
        if let Err(e) = self
            .inner
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!(address = %self.inner.address, "disconnect: {}", e);
        }
    }
}

async fn authenticate(handle: &mut Handle<ClientHandler>, config: &ConnectConfig) -> Result<bool> {
    match &config.auth {
        AuthMethod::Password(password) => {
            let result = handle
                .authenticate_password(&config.user, password)
                .await
                .map_err(Error::Protocol)?;
            Ok(result.success())
        }
        AuthMethod::KeyFile { path, passphrase } => {
            let key = load_secret_key(path, passphrase.as_deref()).map_err(|e| {
                Error::KeyLoadFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;
            authenticate_key(handle, &config.user, Arc::new(key)).await
        }
        AuthMethod::Key(key) => authenticate_key(handle, &config.user, Arc::clone(key)).await,
        AuthMethod::Agent => {
            let mut agent = AgentClient::connect_env()
                .await
                .map_err(|e| Error::AgentUnavailable(e.to_string()))?;
            let keys = agent.request_identities().await.map_err(|e| {
                Error::AgentUnavailable(format!("failed to list agent keys: {}", e))
            })?;
            if keys.is_empty() {
                return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
            }

            for key in &keys {
                match handle
                    .authenticate_publickey_with(&config.user, key.clone(), None, &mut agent)
                    .await
                {
                    Ok(result) if result.success() => return Ok(true),
                    _ => continue,
                }
            }
            Ok(false)
        }
    }
}

async fn authenticate_key(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    key: Arc<PrivateKey>,
) -> Result<bool> {
    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .map_err(Error::Protocol)?
        .flatten();

    let result = handle
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
        .await
        .map_err(Error::Protocol)?;

    Ok(result.success())
}
