// ABOUTME: Single-file SCP push over a Session's channel.
// ABOUTME: Streams header, body, and terminator, then maps the sink's exit into a result.

use super::codec::{ControlLine, TERMINATOR, decode_status_message, sink_command};
use crate::ssh::session::wait_for_exit;
use crate::ssh::{CommandError, ConnectConfig, Connection, Error, Result, Session, race_deadline};
use russh::Channel;
use russh::client::Msg;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 32 * 1024;

impl Session {
    /// Push `local` to `destination` on the remote host with `scp -tq`.
    ///
    /// The remote file takes the local file's base name and permission bits.
    /// A local read or channel write failure aborts the transfer with
    /// [`Error::Transfer`]; a non-zero sink exit becomes [`Error::Command`]
    /// with the first status message as its stdout.
    pub async fn copy(&mut self, local: &Path, destination: &str) -> Result<()> {
        let transfer_error = |source: io::Error| Error::Transfer {
            path: local.to_path_buf(),
            source,
        };

        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| ControlLine::is_valid_name(n))
            .ok_or_else(|| {
                transfer_error(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "file name cannot be sent over scp",
                ))
            })?;
        let mut file = File::open(local).await.map_err(transfer_error)?;
        let metadata = file.metadata().await.map_err(transfer_error)?;
        if !metadata.is_file() {
            return Err(transfer_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only regular files can be copied",
            )));
        }
        let header = ControlLine::new(file_mode(&metadata), metadata.len(), name);

        let mut channel = self.take_channel().await?;
        let command = sink_command(destination);
        tracing::debug!(local = %local.display(), destination, "starting scp sink");
        channel.exec(true, command.as_str()).await?;

        if let Err(source) = send_file(&channel, &header, &mut file).await {
            let _ = channel.eof().await;
            let _ = channel.close().await;
            return Err(transfer_error(source));
        }
        channel
            .eof()
            .await
            .map_err(|e| transfer_error(io::Error::other(e)))?;

        // The sink's replies are status-framed, so they are kept apart from
        // the session's captured command output.
        let mut replies = Vec::new();
        let mut stderr = Vec::new();
        let exit_code = wait_for_exit(&mut channel, &mut replies, &mut stderr).await;
        let _ = channel.close().await;
        let exit_code = exit_code?;

        if exit_code != 0 {
            return Err(CommandError::new(
                exit_code,
                decode_status_message(&replies),
                String::from_utf8_lossy(&stderr),
            )
            .into());
        }
        tracing::debug!(bytes = header.length, destination, "scp transfer complete");
        Ok(())
    }
}

async fn send_file(channel: &Channel<Msg>, header: &ControlLine, file: &mut File) -> io::Result<()> {
    channel
        .data(header.encode().as_bytes())
        .await
        .map_err(io::Error::other)?;

    let mut remaining = header.length;
    let mut buf = vec![0u8; CHUNK_SIZE];
    while remaining > 0 {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while sending; {remaining} bytes missing"),
            ));
        }
        let n = n.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        channel.data(&buf[..n]).await.map_err(io::Error::other)?;
        remaining -= n as u64;
    }

    channel.data(&[TERMINATOR][..]).await.map_err(io::Error::other)?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

/// Free-function form of [`Session::copy`].
pub async fn copy_file(session: &mut Session, local: &Path, destination: &str) -> Result<()> {
    session.copy(local, destination).await
}

/// Dial, push one file, and disconnect, all within `timeout`.
///
/// Same deadline rules as [`execute`](crate::ssh::execute): `Duration::ZERO`
/// waits indefinitely, and a transfer still running at the deadline is
/// abandoned rather than cancelled.
pub async fn push(
    config: ConnectConfig,
    local: impl Into<PathBuf>,
    destination: impl Into<String>,
    timeout: Duration,
) -> Result<()> {
    let local = local.into();
    let destination = destination.into();
    race_deadline(timeout, async move {
        let connection = Connection::connect(&config).await?;
        let mut session = Session::open_owned(connection).await?;
        let result = session.copy(&local, &destination).await;
        session.close().await;
        result
    })
    .await
}
