// ABOUTME: Test server listener and shutdown control.
// ABOUTME: Binds the socket, runs the russh accept loop, and stops it on request or drop.

use super::config::ServerConfig;
use super::dispatch::Dispatcher;
use super::error::{Error, Result};
use parking_lot::Mutex;
use russh::server::{self, Server};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Acceptor {
    config: Arc<ServerConfig>,
}

impl Server for Acceptor {
    type Handler = Dispatcher;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> Dispatcher {
        tracing::debug!(?peer, "accepted connection");
        Dispatcher::new(Arc::clone(&self.config), peer)
    }

    fn handle_session_error(&mut self, error: <Dispatcher as server::Handler>::Error) {
        tracing::warn!(%error, "connection ended with error");
    }
}

/// Stops the accept loop. Safe to call more than once and from any task.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    slot: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ShutdownHandle {
    fn new(tx: oneshot::Sender<()>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub fn shutdown(&self) {
        if let Some(tx) = self.slot.lock().take() {
            let _ = tx.send(());
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// A listening test server. Dropping it shuts the listener down.
///
/// Connections that were already accepted keep running until their clients
/// disconnect.
#[derive(Debug)]
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    task: Option<JoinHandle<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// `ip:port`, bracketed for IPv6, suitable for the client's address parser.
    pub fn address(&self) -> String {
        self.local_addr.to_string()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Shut down and wait until the listening socket is closed.
    pub async fn stop(mut self) {
        self.shutdown.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

/// Bind and start serving in the background.
///
/// Host keys are loaded before binding, so a bad key never leaves a socket
/// open.
pub async fn start(config: ServerConfig) -> Result<RunningServer> {
    let mut ssh_config = server::Config::default();
    ssh_config.auth_rejection_time = config.auth_rejection_time;
    ssh_config.keys = config.load_host_keys()?;
    let ssh_config = Arc::new(ssh_config);

    let addr = config.listen_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;

    let (tx, rx) = oneshot::channel();
    let mut acceptor = Acceptor {
        config: Arc::new(config),
    };
    let task = tokio::spawn(async move {
        tokio::select! {
            result = async { acceptor.run_on_socket(ssh_config, &listener).await } => {
                if let Err(error) = result {
                    tracing::warn!(%error, "accept loop stopped");
                }
            }
            _ = rx => {}
        }
        drop(listener);
        tracing::info!(%local_addr, "test server stopped");
    });

    tracing::info!(%local_addr, "test server listening");
    Ok(RunningServer {
        local_addr,
        shutdown: ShutdownHandle::new(tx),
        task: Some(task),
    })
}
