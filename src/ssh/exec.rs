// ABOUTME: Timeout-bounded command execution.
// ABOUTME: Races a spawned worker against a deadline; a timed-out worker is abandoned, not killed.

use super::client::{AuthMethod, ConnectConfig, Connection};
use super::error::{Error, Result};
use super::output::Results;
use super::session::{Session, TerminalRequest};
use russh::keys::PrivateKey;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Run `worker` on its own task and wait for it or the deadline, whichever
/// comes first. `Duration::ZERO` waits indefinitely.
///
/// russh cannot cancel an in-flight `exec`, so on timeout the worker is left
/// running: the remote command may still be executing, and the connection it
/// uses stays open until the worker finishes or the caller closes it.
pub(crate) async fn race_deadline<F, T>(timeout: Duration, worker: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    // A oneshot holds one value without blocking the sender, so a result that
    // arrives after the deadline is simply dropped.
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(worker.await);
    });

    if timeout.is_zero() {
        return rx.await.map_err(|_| Error::WorkerLost)?;
    }

    tokio::select! {
        result = rx => result.map_err(|_| Error::WorkerLost)?,
        () = tokio::time::sleep(timeout) => {
            tracing::warn!(?timeout, "command deadline elapsed; abandoning worker");
            Err(Error::CommandTimeout(timeout))
        }
    }
}

/// Runs commands on an existing connection, one [`Session`] per command.
#[derive(Debug, Clone)]
pub struct Executor {
    connection: Connection,
    timeout: Duration,
    terminal: Option<TerminalRequest>,
}

impl Executor {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            timeout: Duration::from_secs(300),
            terminal: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Request a pseudo-terminal before each command.
    pub fn terminal(mut self, request: TerminalRequest) -> Self {
        self.terminal = Some(request);
        self
    }

    /// Run one command. A non-zero exit is returned as [`Error::Command`].
    ///
    /// After a timeout, close the connection to stop waiting on the remote side.
    pub async fn run(&self, command: &str) -> Result<Results> {
        let connection = self.connection.clone();
        let terminal = self.terminal.clone();
        let command = command.to_string();

        let results = race_deadline(self.timeout, async move {
            let mut session = Session::open(&connection).await?;
            let results = run_in_session(&mut session, terminal, &command).await;
            session.close().await;
            results
        })
        .await?;

        Ok(results.into_result()?)
    }
}

async fn run_in_session(
    session: &mut Session,
    terminal: Option<TerminalRequest>,
    command: &str,
) -> Result<Results> {
    if let Some(request) = terminal {
        session.request_terminal(request).await?;
    }
    session.buffer();
    session.run(command).await
}

/// Dial, authenticate, run one command, and disconnect, all within `timeout`.
///
/// Exit code is authoritative: a non-zero exit becomes [`Error::Command`]
/// carrying the captured output, while stderr output alone does not fail the
/// call.
pub async fn execute(
    config: ConnectConfig,
    terminal: Option<TerminalRequest>,
    command: &str,
    timeout: Duration,
) -> Result<Results> {
    let command = command.to_string();
    let results = race_deadline(timeout, async move {
        let connection = Connection::connect(&config).await?;
        let mut session = Session::open_owned(connection).await?;
        let results = run_in_session(&mut session, terminal, &command).await;
        session.close().await;
        results
    })
    .await?;

    Ok(results.into_result()?)
}

/// [`execute`] with password authentication against `host[:port]`.
pub async fn execute_with_password(
    address: &str,
    user: &str,
    password: &str,
    command: &str,
    timeout: Duration,
) -> Result<Results> {
    let config = ConnectConfig::from_address(
        address,
        user,
        AuthMethod::Password(password.to_string()),
    )?;
    execute(config, None, command, timeout).await
}

/// [`execute`] with an already-loaded private key against `host[:port]`.
pub async fn execute_with_key(
    address: &str,
    user: &str,
    key: Arc<PrivateKey>,
    command: &str,
    timeout: Duration,
) -> Result<Results> {
    let config = ConnectConfig::from_address(address, user, AuthMethod::Key(key))?;
    execute(config, None, command, timeout).await
}

/// [`execute`] with identities from the running ssh-agent.
pub async fn execute_with_agent(
    address: &str,
    user: &str,
    command: &str,
    timeout: Duration,
) -> Result<Results> {
    let config = ConnectConfig::from_address(address, user, AuthMethod::Agent)?;
    execute(config, None, command, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_before_deadline_wins() {
        let result = race_deadline(Duration::from_secs(5), async { Ok::<_, Error>(7u32) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn deadline_before_completion_times_out() {
        let result = race_deadline(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, Error>(1u32)
        })
        .await;
        assert!(matches!(result, Err(Error::CommandTimeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn zero_timeout_waits_indefinitely() {
        let result = race_deadline(Duration::ZERO, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, Error>("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn worker_errors_pass_through() {
        let result: Result<()> =
            race_deadline(Duration::from_secs(5), async { Err(Error::ChannelClosed) }).await;
        assert!(matches!(result, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn panicking_worker_is_reported() {
        let result: Result<()> = race_deadline(Duration::from_secs(5), async {
            if true {
                panic!("worker exploded");
            }
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::WorkerLost)));
    }

    #[tokio::test]
    async fn late_result_does_not_block_worker() {
        let (done_tx, done_rx) = oneshot::channel();
        let result = race_deadline(Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = done_tx.send(());
            Ok::<_, Error>(())
        })
        .await;
        assert!(result.unwrap_err().is_timeout());
        // The abandoned worker still runs to completion.
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("worker should finish")
            .expect("worker should signal");
    }

    #[tokio::test]
    async fn bad_address_fails_before_dialing() {
        let result = execute_with_password("host:99999", "u", "p", "true", Duration::ZERO).await;
        assert!(matches!(result, Err(Error::InvalidAddress { .. })));
    }
}
