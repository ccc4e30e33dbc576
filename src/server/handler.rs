// ABOUTME: Pluggable command handlers for the test server.
// ABOUTME: Echo, scripted mock, and bash-backed handlers behind one async trait.

use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Failure inside a [`CommandHandler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("channel closed while the handler was writing")]
    ChannelClosed,

    #[error("handler failed with status {code}: {message}")]
    Failed { code: u32, message: String },

    #[error("handler I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HandlerError {
    /// Exit status reported to the client when a handler fails.
    pub fn exit_code(&self) -> u32 {
        match self {
            HandlerError::Failed { code, .. } => *code,
            HandlerError::ChannelClosed | HandlerError::Io(_) => 1,
        }
    }
}

/// One chunk written by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// The handler's view of an exec channel: client input until EOF, and
/// stdout/stderr sinks.
#[derive(Debug)]
pub struct ChannelIo {
    input: mpsc::UnboundedReceiver<Vec<u8>>,
    output: mpsc::UnboundedSender<Output>,
}

impl ChannelIo {
    pub fn new(
        input: mpsc::UnboundedReceiver<Vec<u8>>,
        output: mpsc::UnboundedSender<Output>,
    ) -> Self {
        Self { input, output }
    }

    /// A detached `ChannelIo` plus the ends a caller drives it with.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedSender<Vec<u8>>,
        mpsc::UnboundedReceiver<Output>,
    ) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        (Self::new(input_rx, output_tx), input_tx, output_rx)
    }

    pub fn write_stdout(&self, data: impl Into<Vec<u8>>) -> Result<(), HandlerError> {
        self.output
            .send(Output::Stdout(data.into()))
            .map_err(|_| HandlerError::ChannelClosed)
    }

    pub fn write_stderr(&self, data: impl Into<Vec<u8>>) -> Result<(), HandlerError> {
        self.output
            .send(Output::Stderr(data.into()))
            .map_err(|_| HandlerError::ChannelClosed)
    }

    /// Next chunk of client input; `None` once the client sent EOF.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        self.input.recv().await
    }

    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut all = Vec::new();
        while let Some(chunk) = self.read().await {
            all.extend_from_slice(&chunk);
        }
        all
    }
}

/// Executes one `exec` request and returns its exit status.
#[async_trait]
pub trait CommandHandler: Send + Sync + Debug {
    async fn exec(&self, command: &str, io: &mut ChannelIo) -> Result<u32, HandlerError>;
}

/// Reports the command it was given.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl CommandHandler for EchoHandler {
    async fn exec(&self, command: &str, io: &mut ChannelIo) -> Result<u32, HandlerError> {
        io.write_stdout(format!("command is: {command:?}"))?;
        Ok(0)
    }
}

/// Returns the same scripted result for every command.
#[derive(Debug, Clone, Default)]
pub struct MockHandler {
    pub rc: u32,
    pub stdout: String,
    pub stderr: String,
}

impl MockHandler {
    pub fn new(rc: u32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            rc,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

#[async_trait]
impl CommandHandler for MockHandler {
    async fn exec(&self, _command: &str, io: &mut ChannelIo) -> Result<u32, HandlerError> {
        if !self.stdout.is_empty() {
            io.write_stdout(self.stdout.as_bytes())?;
        }
        if !self.stderr.is_empty() {
            io.write_stderr(self.stderr.as_bytes())?;
        }
        Ok(self.rc)
    }
}

/// Runs the command with a local non-interactive bash.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellHandler;

#[async_trait]
impl CommandHandler for ShellHandler {
    async fn exec(&self, command: &str, io: &mut ChannelIo) -> Result<u32, HandlerError> {
        let mut child = Command::new("bash")
            .args(["--noprofile", "--norc", "-c", command])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("child stderr not captured"))?;

        let ChannelIo { input, output } = io;
        let output = &*output;
        let feed = async move {
            while let Some(chunk) = input.recv().await {
                let Some(pipe) = stdin.as_mut() else { continue };
                if pipe.write_all(&chunk).await.is_err() {
                    // Child stopped reading; keep draining client input.
                    stdin = None;
                }
            }
            drop(stdin);
        };
        let wait = async {
            let (out, err) = tokio::join!(
                pump(&mut stdout, output, Output::Stdout),
                pump(&mut stderr, output, Output::Stderr)
            );
            out?;
            err?;
            child.wait().await
        };
        tokio::pin!(feed, wait);

        // Input may never reach EOF, so the exit status decides when to stop.
        let mut fed = false;
        let status = loop {
            tokio::select! {
                status = &mut wait => break status?,
                () = &mut feed, if !fed => fed = true,
            }
        };

        match status.code() {
            Some(code) => Ok(u32::try_from(code).unwrap_or(1)),
            None => Err(HandlerError::Failed {
                code: 137,
                message: "bash terminated by signal".to_string(),
            }),
        }
    }
}

async fn pump<R>(
    reader: &mut R,
    output: &mpsc::UnboundedSender<Output>,
    wrap: fn(Vec<u8>) -> Output,
) -> io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        output
            .send(wrap(buf[..n].to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut rx: mpsc::UnboundedReceiver<Output>) -> (Vec<u8>, Vec<u8>) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        while let Ok(chunk) = rx.try_recv() {
            match chunk {
                Output::Stdout(d) => out.extend(d),
                Output::Stderr(d) => err.extend(d),
            }
        }
        (out, err)
    }

    #[tokio::test]
    async fn echo_reports_command() {
        let (mut io, _input, output) = ChannelIo::pair();
        let rc = EchoHandler.exec("ls -la", &mut io).await.unwrap();
        drop(io);
        assert_eq!(rc, 0);
        let (out, err) = drain(output);
        assert_eq!(String::from_utf8(out).unwrap(), "command is: \"ls -la\"");
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn mock_ignores_command_text() {
        let handler = MockHandler::new(23, "meh", "we have a failure to communicate");
        let (mut io, _input, output) = ChannelIo::pair();
        let rc = handler.exec("anything at all", &mut io).await.unwrap();
        drop(io);
        assert_eq!(rc, 23);
        let (out, err) = drain(output);
        assert_eq!(out, b"meh");
        assert_eq!(err, b"we have a failure to communicate");
    }

    #[tokio::test]
    async fn write_after_receiver_dropped_fails() {
        let (io, _input, output) = ChannelIo::pair();
        drop(output);
        assert!(matches!(
            io.write_stdout("x"),
            Err(HandlerError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn read_to_end_stops_at_eof() {
        let (mut io, input, _output) = ChannelIo::pair();
        input.send(b"ab".to_vec()).unwrap();
        input.send(b"cd".to_vec()).unwrap();
        drop(input);
        assert_eq!(io.read_to_end().await, b"abcd");
    }

    #[tokio::test]
    async fn shell_reports_exit_code_and_streams() {
        let (mut io, input, output) = ChannelIo::pair();
        drop(input);
        let rc = ShellHandler
            .exec("echo out; echo err >&2; exit 3", &mut io)
            .await
            .unwrap();
        drop(io);
        assert_eq!(rc, 3);
        let (out, err) = drain(output);
        assert_eq!(out, b"out\n");
        assert_eq!(err, b"err\n");
    }

    #[tokio::test]
    async fn shell_forwards_input() {
        let (mut io, input, output) = ChannelIo::pair();
        input.send(b"hello\n".to_vec()).unwrap();
        drop(input);
        let rc = ShellHandler.exec("cat", &mut io).await.unwrap();
        drop(io);
        assert_eq!(rc, 0);
        assert_eq!(drain(output).0, b"hello\n");
    }

    #[test]
    fn handler_errors_map_to_exit_codes() {
        assert_eq!(
            HandlerError::Failed {
                code: 9,
                message: String::new()
            }
            .exit_code(),
            9
        );
        assert_eq!(HandlerError::ChannelClosed.exit_code(), 1);
    }
}
