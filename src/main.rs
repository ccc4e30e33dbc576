// ABOUTME: Entry point for the sshclient CLI application.
// ABOUTME: Parses arguments, loads configuration, and dispatches to exec, copy, or serve.

mod cli;

use clap::Parser;
use cli::{AuthArgs, Cli, Commands, HandlerArg};
use sshclient::config::{ClientConfig, Config, Destination, HandlerKind, HostKeyCheck, ServerSection};
use sshclient::error::Result;
use sshclient::scp;
use sshclient::server;
use sshclient::ssh;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG applies unless --verbose forces debug output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            let code = e
                .remote_exit_code()
                .and_then(|c| i32::try_from(c).ok())
                .filter(|&c| c != 0)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover(&std::env::current_dir()?)?,
    };

    match cli.command {
        Commands::Exec {
            destination,
            auth,
            timeout,
            tty,
            command,
        } => {
            let mut client = config.client;
            apply_auth(&mut client, &auth);
            exec(&client, &destination, timeout, tty, &command.join(" ")).await
        }
        Commands::Copy {
            local,
            destination,
            port,
            auth,
            timeout,
        } => {
            let mut client = config.client;
            apply_auth(&mut client, &auth);
            copy(&client, &local, &destination, port, timeout).await?;
            Ok(0)
        }
        Commands::Serve {
            port,
            key_file,
            handler,
        } => serve(config.server, port, key_file, handler).await,
    }
}

/// Command-line credentials replace those from the file.
fn apply_auth(client: &mut ClientConfig, auth: &AuthArgs) {
    if let Some(identity) = &auth.identity {
        client.key_path = Some(identity.clone());
    }
    if let Some(password) = &auth.password {
        client.password = Some(password.clone());
        client.agent = false;
    }
    if auth.agent {
        client.agent = true;
        client.key_path = None;
    }
    if auth.insecure {
        client.host_key_policy = HostKeyCheck::AcceptAny;
    }
}

fn command_timeout(client: &ClientConfig, seconds: Option<u64>) -> Duration {
    seconds
        .map(Duration::from_secs)
        .unwrap_or(client.command_timeout)
}

async fn exec(
    client: &ClientConfig,
    destination: &str,
    timeout: Option<u64>,
    tty: bool,
    command: &str,
) -> Result<i32> {
    let destination = Destination::parse(destination)?;
    let connect = client.connect_config(Some(&destination))?;
    let terminal = match client.terminal_request() {
        Some(request) => Some(request),
        None if tty => Some(ssh::TerminalRequest::default()),
        None => None,
    };

    match ssh::execute(connect, terminal, command, command_timeout(client, timeout)).await {
        Ok(results) => {
            write_output(results.stdout(), results.stderr())?;
            Ok(0)
        }
        Err(ssh::Error::Command(failure)) => {
            write_output(&failure.stdout, &failure.stderr)?;
            Ok(i32::try_from(failure.exit_code).unwrap_or(1))
        }
        Err(e) => Err(e.into()),
    }
}

fn write_output(stdout: &str, stderr: &str) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(stdout.as_bytes())?;
    out.flush()?;
    let mut err = std::io::stderr().lock();
    err.write_all(stderr.as_bytes())?;
    err.flush()
}

async fn copy(
    client: &ClientConfig,
    local: &Path,
    destination: &str,
    port: Option<u16>,
    timeout: Option<u64>,
) -> Result<()> {
    let (mut destination, remote_path) = Destination::parse_remote_path(destination)?;
    destination.port = port;
    let connect = client.connect_config(Some(&destination))?;
    let timeout = command_timeout(client, timeout);

    let host = connect.host.clone();
    scp::push(connect, local, remote_path.as_str(), timeout).await?;
    println!("{} -> {}:{}", local.display(), host, remote_path);
    Ok(())
}

async fn serve(
    mut section: ServerSection,
    port: Option<u16>,
    key_file: Option<PathBuf>,
    handler: Option<HandlerArg>,
) -> Result<i32> {
    if port.is_some() {
        section.port = port;
    }
    if key_file.is_some() {
        section.key_file = key_file;
    }
    if let Some(handler) = handler {
        section.handler = match handler {
            HandlerArg::Echo => HandlerKind::Echo,
            HandlerArg::Shell => HandlerKind::Shell,
        };
    }

    let server = server::start(section.server_config()?).await?;
    println!("listening on {}", server.address());

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupted; shutting down");
    server.stop().await;
    Ok(0)
}
