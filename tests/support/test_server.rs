// ABOUTME: In-process SSH server fixtures for integration tests.
// ABOUTME: Starts servers with the fixture host key and provides SCP sink handlers.

use async_trait::async_trait;
use sshclient::scp::ControlLine;
use sshclient::server::{
    self, ChannelIo, CommandHandler, HandlerError, RefusedRequest, RunningServer, ServerConfig,
};
use sshclient::ssh::{AuthMethod, ConnectConfig, HostKeyPolicy};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const USER: &str = "joebob";
pub const PASSWORD: &str = "howdy!";

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Loopback server accepting `joebob`/`howdy!` and the fixture client key.
pub fn base_config() -> ServerConfig {
    let client_key = std::fs::read_to_string(fixture("client_key.pub")).unwrap();
    ServerConfig::new()
        .hostname("127.0.0.1")
        .credentials(USER, PASSWORD)
        .key_file(fixture("host_key"))
        .authorized_key(russh::keys::ssh_key::PublicKey::from_openssh(client_key.trim()).unwrap())
}

pub async fn start(handler: impl CommandHandler + 'static) -> RunningServer {
    super::init_tracing();
    server::start(base_config().handler(handler))
        .await
        .expect("test server should start")
}

/// A server that answers `request` with a failure.
pub async fn start_refusing(
    handler: impl CommandHandler + 'static,
    request: RefusedRequest,
) -> RunningServer {
    super::init_tracing();
    server::start(base_config().handler(handler).refuse(request))
        .await
        .expect("test server should start")
}

/// Password login against `server`, trusting its key.
pub fn password_config(server: &RunningServer) -> ConnectConfig {
    connect_config(server, AuthMethod::Password(PASSWORD.to_string()))
}

pub fn connect_config(server: &RunningServer, auth: AuthMethod) -> ConnectConfig {
    ConnectConfig::from_address(&server.address(), USER, auth)
        .unwrap()
        .host_key_policy(HostKeyPolicy::AcceptAny)
        .connect_timeout(Duration::from_secs(5))
}

fn sink_target(command: &str) -> Result<PathBuf, HandlerError> {
    let target = command
        .strip_prefix("scp -tq ")
        .ok_or_else(|| HandlerError::Failed {
            code: 127,
            message: format!("not an scp sink: {command}"),
        })?;
    let target = target
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(target);
    Ok(PathBuf::from(target))
}

/// Acts like `scp -t <dir>`: writes the received file with its mode.
#[derive(Debug, Default)]
pub struct ScpSink;

#[async_trait]
impl CommandHandler for ScpSink {
    async fn exec(&self, command: &str, io: &mut ChannelIo) -> Result<u32, HandlerError> {
        let dir = sink_target(command)?;
        io.write_stdout(vec![0u8])?;

        let data = io.read_to_end().await;
        let newline = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| HandlerError::Failed {
                code: 1,
                message: "no control line".to_string(),
            })?;
        let header = match ControlLine::parse(&data[..=newline]) {
            Ok(header) => header,
            Err(e) => {
                io.write_stdout(format!("\x02scp: {e}\n"))?;
                return Ok(1);
            }
        };
        io.write_stdout(vec![0u8])?;

        let body_start = newline + 1;
        let body_end = body_start + header.length as usize;
        if data.len() != body_end + 1 || data[body_end] != 0 {
            io.write_stdout("\x02scp: truncated file body\n")?;
            return Ok(1);
        }

        let path = dir.join(&header.name);
        std::fs::write(&path, &data[body_start..body_end])?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(header.mode))?;
        }
        io.write_stdout(vec![0u8])?;
        Ok(0)
    }
}

/// A sink that refuses every file.
#[derive(Debug, Default)]
pub struct RejectingSink;

#[async_trait]
impl CommandHandler for RejectingSink {
    async fn exec(&self, command: &str, io: &mut ChannelIo) -> Result<u32, HandlerError> {
        let dir = sink_target(command)?;
        io.read_to_end().await;
        io.write_stdout(format!(
            "\x01scp: {}: Permission denied\n\x02scp: protocol error\n",
            dir.display()
        ))?;
        io.write_stderr("sink refused transfer")?;
        Ok(1)
    }
}

/// Never finishes on its own.
#[derive(Debug, Default)]
pub struct Stalled;

#[async_trait]
impl CommandHandler for Stalled {
    async fn exec(&self, _command: &str, _io: &mut ChannelIo) -> Result<u32, HandlerError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(0)
    }
}
