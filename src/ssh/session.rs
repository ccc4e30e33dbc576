// ABOUTME: A logical SSH channel with captured stdout/stderr buffers.
// ABOUTME: Wraps terminal negotiation, command execution, and teardown.

use super::client::Connection;
use super::error::{Error, Result};
use super::output::Results;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty, Sig};

/// Pseudo-terminal parameters sent with `pty-req`.
#[derive(Debug, Clone)]
pub struct TerminalRequest {
    pub term: String,
    pub width: u32,
    pub height: u32,
    pub modes: Vec<(Pty, u32)>,
}

impl TerminalRequest {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

impl Default for TerminalRequest {
    /// An 80x40 xterm with echo disabled and 14.4kbaud line speed markers.
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            width: 80,
            height: 40,
            modes: vec![
                (Pty::ECHO, 0),
                (Pty::TTY_OP_ISPEED, 14400),
                (Pty::TTY_OP_OSPEED, 14400),
            ],
        }
    }
}

/// One logical channel on a [`Connection`].
///
/// `run` and `copy` must not be issued concurrently; each takes `&mut self`.
/// An SSH session channel carries a single command, so a session that has
/// already run something opens a fresh channel on the same connection (and
/// repeats any terminal request) for the next one.
pub struct Session {
    connection: Connection,
    owns_connection: bool,
    channel: Option<Channel<Msg>>,
    terminal: Option<TerminalRequest>,
    buffered: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .field("owns_connection", &self.owns_connection)
            .field("channel", &self.channel.as_ref().map(|c| c.id()))
            .field("terminal", &self.terminal)
            .field("buffered", &self.buffered)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Session {
    /// Open a channel on a connection the caller keeps ownership of.
    pub async fn open(connection: &Connection) -> Result<Self> {
        Self::open_inner(connection.clone(), false).await
    }

    /// Open a channel and take ownership of the connection; closing the
    /// session also closes the connection.
    pub async fn open_owned(connection: Connection) -> Result<Self> {
        Self::open_inner(connection, true).await
    }

    async fn open_inner(connection: Connection, owns_connection: bool) -> Result<Self> {
        let channel = connection.open_channel().await?;
        tracing::debug!(channel = ?channel.id(), address = connection.address(), "session opened");
        Ok(Self {
            connection,
            owns_connection,
            channel: Some(channel),
            terminal: None,
            buffered: false,
            stdout: Vec::new(),
            stderr: Vec::new(),
            closed: false,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Ask the remote side for a pseudo-terminal.
    ///
    /// A refusal is treated as fatal for the connection: it is closed before
    /// the error is returned.
    pub async fn request_terminal(&mut self, request: TerminalRequest) -> Result<()> {
        let outcome = match self.ensure_channel().await {
            Ok(channel) => negotiate_terminal(channel, &request).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                self.terminal = Some(request);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(address = self.connection.address(), "terminal request failed: {}", e);
                self.closed = true;
                self.channel = None;
                self.connection.close().await;
                Err(match e {
                    Error::Terminal(_) => e,
                    other => Error::Terminal(other.to_string()),
                })
            }
        }
    }

    /// Capture remote stdout/stderr into this session's buffers.
    pub fn buffer(&mut self) {
        self.buffered = true;
    }

    /// Drop captured output so the session can be reused.
    pub fn clear(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Run a command and wait for it to finish.
    ///
    /// The returned [`Results`] carries whatever exit code the remote process
    /// reported, zero or not; use [`Results::into_result`] to turn a failure
    /// into an error.
    pub async fn run(&mut self, command: &str) -> Result<Results> {
        let mut channel = self.take_channel().await?;
        tracing::debug!(channel = ?channel.id(), command, "exec");
        channel.exec(true, command).await?;
        let exit_code = if self.buffered {
            wait_for_exit(&mut channel, &mut self.stdout, &mut self.stderr).await
        } else {
            wait_for_exit(&mut channel, &mut Vec::new(), &mut Vec::new()).await
        };
        let _ = channel.close().await;
        let exit_code = exit_code?;
        tracing::debug!(exit_code, "command finished");
        Ok(Results::from_bytes(exit_code, &self.stdout, &self.stderr))
    }

    /// Close the channel, then the connection if this session owns it.
    /// Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(channel) = self.channel.take() {
            let _ = channel.close().await;
        }
        if self.owns_connection {
            self.connection.close().await;
        }
    }

    async fn ensure_channel(&mut self) -> Result<&mut Channel<Msg>> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let channel = match self.channel.take() {
            Some(channel) => channel,
            None => {
                let mut channel = self.connection.open_channel().await?;
                if let Some(request) = &self.terminal {
                    negotiate_terminal(&mut channel, request).await?;
                }
                channel
            }
        };
        Ok(self.channel.insert(channel))
    }

    /// Hand out the current channel for a single exec; the session is left
    /// without one until the next call.
    pub(crate) async fn take_channel(&mut self) -> Result<Channel<Msg>> {
        self.ensure_channel().await?;
        self.channel.take().ok_or(Error::SessionClosed)
    }
}

/// Drain channel messages until the remote command completes, appending
/// stdout and stderr to the given buffers.
///
/// A refused exec is [`Error::ExecRejected`]; the caller still owns the
/// channel and must close it.
pub(crate) async fn wait_for_exit(
    channel: &mut Channel<Msg>,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> Result<u32> {
    let mut exit_code = None;
    let mut got_eof = false;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::ExitSignal {
                signal_name,
                error_message,
                ..
            }) => {
                tracing::debug!(?signal_name, error = %error_message, "remote command killed by signal");
                exit_code = Some(signal_exit_code(&signal_name));
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::Eof) => {
                got_eof = true;
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) => {
                got_eof = true;
                break;
            }
            // The pty reply, if any, was consumed earlier; only the exec is outstanding.
            Some(ChannelMsg::Failure) => return Err(Error::ExecRejected),
            Some(_) => {}
            None => break,
        }
    }

    match exit_code {
        Some(code) => Ok(code),
        None if got_eof => {
            tracing::warn!("remote command exited without an exit status; assuming 0");
            Ok(0)
        }
        None => Err(Error::ChannelClosed),
    }
}

async fn negotiate_terminal(channel: &mut Channel<Msg>, request: &TerminalRequest) -> Result<()> {
    channel
        .request_pty(
            true,
            &request.term,
            request.width,
            request.height,
            0,
            0,
            &request.modes,
        )
        .await
        .map_err(|e| Error::Terminal(e.to_string()))?;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(Error::Terminal("remote refused pty-req".to_string()));
            }
            Some(ChannelMsg::Close) | None => {
                return Err(Error::Terminal(
                    "channel closed before pty-req was answered".to_string(),
                ));
            }
            Some(_) => {}
        }
    }
}

/// Shell convention: 128 plus the signal number.
fn signal_exit_code(signal: &Sig) -> u32 {
    let number = match signal {
        Sig::HUP => 1,
        Sig::INT => 2,
        Sig::QUIT => 3,
        Sig::ILL => 4,
        Sig::ABRT => 6,
        Sig::FPE => 8,
        Sig::KILL => 9,
        Sig::USR1 => 10,
        Sig::SEGV => 11,
        Sig::PIPE => 13,
        Sig::ALRM => 14,
        Sig::TERM => 15,
        _ => 0,
    };
    128 + number
}
