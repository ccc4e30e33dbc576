// ABOUTME: Server section of the configuration file.
// ABOUTME: Maps listen settings and the handler choice onto the test server's ServerConfig.

use crate::error::{Error, Result};
use crate::server::{EchoHandler, MockHandler, ServerConfig, ShellHandler};
use russh::keys::ssh_key::PublicKey;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// OpenSSH `.pub` files accepted for public key login.
    #[serde(default)]
    pub authorized_keys: Vec<PathBuf>,
    #[serde(default)]
    pub handler: HandlerKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HandlerKind {
    #[default]
    Echo,
    Shell,
    Mock {
        #[serde(default)]
        rc: u32,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
    },
}

fn default_hostname() -> String {
    "localhost".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: None,
            username: None,
            password: None,
            key_file: None,
            authorized_keys: Vec::new(),
            handler: HandlerKind::default(),
        }
    }
}

impl ServerSection {
    pub fn server_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::new().hostname(&self.hostname);
        if let Some(port) = self.port {
            config = config.port(port);
        }
        config.username = self.username.clone();
        config.password = self.password.clone();
        if let Some(path) = &self.key_file {
            config = config.key_file(path);
        }
        for path in &self.authorized_keys {
            let text = std::fs::read_to_string(path)?;
            let key = PublicKey::from_openssh(text.trim()).map_err(|e| {
                Error::InvalidConfig(format!("authorized key {}: {e}", path.display()))
            })?;
            config = config.authorized_key(key);
        }

        Ok(match &self.handler {
            HandlerKind::Echo => config.handler(EchoHandler),
            HandlerKind::Shell => config.handler(ShellHandler),
            HandlerKind::Mock { rc, stdout, stderr } => {
                config.handler(MockHandler::new(*rc, stdout.as_str(), stderr.as_str()))
            }
        })
    }
}
