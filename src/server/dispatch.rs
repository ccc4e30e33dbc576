// ABOUTME: Per-connection request dispatcher for the test server.
// ABOUTME: Authenticates, accepts session channels, and runs exec requests through the configured handler.

use super::config::{RefusedRequest, ServerConfig};
use super::handler::{ChannelIo, CommandHandler, Output};
use russh::keys::ssh_key;
use russh::server::{self, Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodKind, MethodSet, Pty, Sig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Serves one client connection.
pub(crate) struct Dispatcher {
    config: Arc<ServerConfig>,
    peer: Option<SocketAddr>,
    /// Client input for channels with a running exec, dropped on EOF.
    inputs: HashMap<ChannelId, mpsc::UnboundedSender<Vec<u8>>>,
}

impl Dispatcher {
    pub(crate) fn new(config: Arc<ServerConfig>, peer: Option<SocketAddr>) -> Self {
        Self {
            config,
            peer,
            inputs: HashMap::new(),
        }
    }

    fn auth_methods(&self) -> Option<MethodSet> {
        let mut methods = MethodSet::empty();
        if self.config.username.is_some() && self.config.password.is_some() {
            methods.push(MethodKind::Password);
        }
        if !self.config.authorized_keys.is_empty() {
            methods.push(MethodKind::PublicKey);
        }
        Some(methods)
    }

    fn reject(&self) -> Auth {
        Auth::Reject {
            proceed_with_methods: self.auth_methods(),
            partial_success: false,
        }
    }

    fn reject_channel_type(&self, kind: &str) -> Result<bool, russh::Error> {
        tracing::warn!(peer = ?self.peer, kind, "unknown channel type");
        Ok(false)
    }
}

impl server::Handler for Dispatcher {
    type Error = russh::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(self.reject())
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.config.password_matches(user, password) {
            tracing::debug!(peer = ?self.peer, user, "password accepted");
            Ok(Auth::Accept)
        } else {
            tracing::debug!(peer = ?self.peer, user, "password rejected");
            Ok(self.reject())
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &ssh_key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.config.key_authorized(user, public_key) {
            tracing::debug!(peer = ?self.peer, user, "public key accepted");
            Ok(Auth::Accept)
        } else {
            Ok(self.reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(peer = ?self.peer, channel = ?channel.id(), "session channel opened");
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.reject_channel_type("direct-tcpip")
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        tracing::debug!(?channel, "shell requested; acknowledging only");
        session.channel_success(channel)?;
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.config.refuses(RefusedRequest::Pty) {
            tracing::debug!(?channel, term, "pty-req refused");
            session.channel_failure(channel)?;
            return Ok(());
        }
        tracing::debug!(?channel, term, col_width, row_height, "pty-req acknowledged");
        session.channel_success(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(?channel, col_width, row_height, "window-change acknowledged");
        session.channel_success(channel)?;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(?channel, variable_name, "env acknowledged");
        session.channel_success(channel)?;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(?channel, name, "subsystem acknowledged");
        session.channel_success(channel)?;
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(?channel, x11_auth_protocol, x11_screen_number, "x11-req acknowledged");
        session.channel_success(channel)?;
        Ok(())
    }

    async fn agent_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<bool, Self::Error> {
        tracing::debug!(?channel, "auth-agent-req acknowledged");
        // russh only answers this one as a global request.
        session.channel_success(channel)?;
        Ok(true)
    }

    async fn signal(&mut self, channel: ChannelId, signal: Sig, _session: &mut Session) -> Result<(), Self::Error> {
        tracing::debug!(?channel, ?signal, "signal ignored");
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        if self.config.refuses(RefusedRequest::Exec) {
            tracing::debug!(peer = ?self.peer, ?channel, %command, "exec refused");
            session.channel_failure(channel)?;
            return Ok(());
        }
        tracing::debug!(peer = ?self.peer, ?channel, %command, "exec");

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        self.inputs.insert(channel, input_tx);
        session.channel_success(channel)?;

        let handler = Arc::clone(&self.config.handler);
        tokio::spawn(run_exec(session.handle(), channel, handler, command, input_rx));
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(input) = self.inputs.get(&channel)
            && input.send(data.to_vec()).is_err()
        {
            // Handler already returned.
            self.inputs.remove(&channel);
        }
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.inputs.remove(&channel);
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.inputs.remove(&channel);
        tracing::debug!(peer = ?self.peer, ?channel, "channel closed");
        Ok(())
    }
}

/// Run the handler, forward its output, then report the exit status and
/// close the channel.
async fn run_exec(
    handle: Handle,
    channel: ChannelId,
    handler: Arc<dyn CommandHandler>,
    command: String,
    input: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (output_tx, mut output_rx) = mpsc::unbounded_channel();
    let mut io = ChannelIo::new(input, output_tx);

    let run = async move {
        let result = handler.exec(&command, &mut io).await;
        drop(io);
        result
    };
    let handle_ref = &handle;
    let forward = async move {
        while let Some(chunk) = output_rx.recv().await {
            let sent = match chunk {
                Output::Stdout(data) => handle_ref.data(channel, CryptoVec::from(data)).await,
                Output::Stderr(data) => {
                    handle_ref
                        .extended_data(channel, 1, CryptoVec::from(data))
                        .await
                }
            };
            if sent.is_err() {
                tracing::debug!(?channel, "client went away; discarding handler output");
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(run, forward);

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(?channel, error = %e, "command handler failed");
            e.exit_code()
        }
    };
    if handle.exit_status_request(channel, exit_code).await.is_err() {
        tracing::debug!(?channel, "could not send exit-status");
    }
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}
