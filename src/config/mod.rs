// ABOUTME: Configuration types and parsing for sshclient.yml.
// ABOUTME: Optional client defaults and test server settings; command-line flags override them.

mod client;
mod destination;
mod server;

pub use client::{ClientConfig, HostKeyCheck, TerminalConfig};
pub use destination::Destination;
pub use server::{HandlerKind, ServerSection};

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILENAME: &str = "sshclient.yml";
pub const CONFIG_FILENAME_ALT: &str = "sshclient.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerSection,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load the first config file found in `dir`, or defaults when there is
    /// none.
    pub fn discover(dir: &Path) -> Result<Self> {
        for name in [CONFIG_FILENAME, CONFIG_FILENAME_ALT] {
            let path = dir.join(name);
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading configuration");
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }
}
