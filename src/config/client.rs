// ABOUTME: Client section of the configuration file.
// ABOUTME: Resolves a destination plus file defaults into a ConnectConfig.

use super::destination::Destination;
use crate::error::{Error, Result};
use crate::ssh::{AuthMethod, ConnectConfig, HostKeyPolicy, TerminalRequest};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default)]
    pub key_passphrase: Option<String>,
    #[serde(default)]
    pub agent: bool,
    #[serde(default)]
    pub host_key_policy: HostKeyCheck,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// `0s` waits forever.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    #[serde(default)]
    pub terminal: Option<TerminalConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyCheck {
    #[default]
    KnownHosts,
    TrustOnFirstUse,
    AcceptAny,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_term() -> String {
    "xterm".to_string()
}

fn default_width() -> u32 {
    80
}

fn default_height() -> u32 {
    40
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            key_path: None,
            key_passphrase: None,
            agent: false,
            host_key_policy: HostKeyCheck::default(),
            known_hosts: None,
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
            terminal: None,
        }
    }
}

impl ClientConfig {
    /// Build connection settings, preferring what the destination names over
    /// file defaults. Without a user anywhere, `$USER` is used.
    pub fn connect_config(&self, destination: Option<&Destination>) -> Result<ConnectConfig> {
        let host = destination
            .map(|d| d.host.clone())
            .or_else(|| self.host.clone())
            .ok_or_else(|| Error::InvalidConfig("no host given".to_string()))?;
        let port = destination.and_then(|d| d.port).or(self.port).unwrap_or(22);
        let user = destination
            .and_then(|d| d.user.clone())
            .or_else(|| self.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .ok_or_else(|| Error::InvalidConfig("no user given and $USER is unset".to_string()))?;

        Ok(ConnectConfig::new(host, user, self.auth_method())
            .port(port)
            .host_key_policy(self.host_key_policy())
            .connect_timeout(self.connect_timeout))
    }

    /// Key file, then password, then the agent.
    pub fn auth_method(&self) -> AuthMethod {
        if let Some(path) = &self.key_path {
            AuthMethod::KeyFile {
                path: path.clone(),
                passphrase: self.key_passphrase.clone(),
            }
        } else if let Some(password) = self.password.as_ref().filter(|_| !self.agent) {
            AuthMethod::Password(password.clone())
        } else {
            AuthMethod::Agent
        }
    }

    pub fn host_key_policy(&self) -> HostKeyPolicy {
        let path = self.known_hosts.clone();
        match self.host_key_policy {
            HostKeyCheck::KnownHosts => HostKeyPolicy::KnownHosts { path },
            HostKeyCheck::TrustOnFirstUse => HostKeyPolicy::TrustOnFirstUse { path },
            HostKeyCheck::AcceptAny => HostKeyPolicy::AcceptAny,
        }
    }

    pub fn terminal_request(&self) -> Option<TerminalRequest> {
        self.terminal.as_ref().map(|t| TerminalRequest {
            term: t.term.clone(),
            ..TerminalRequest::new(t.width, t.height)
        })
    }
}
