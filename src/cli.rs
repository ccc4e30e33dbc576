// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the exec, copy, and serve subcommands and their arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sshclient")]
#[command(about = "Run remote commands with a deadline and push files over SCP")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to ./sshclient.yml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command on a remote host; exits with the remote exit code
    Exec {
        /// Remote host as [user@]host[:port]
        destination: String,

        #[command(flatten)]
        auth: AuthArgs,

        /// Seconds to wait for the command; 0 waits forever
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Request a pseudo-terminal before running the command
        #[arg(long)]
        tty: bool,

        /// Command and arguments to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Push a local file to a remote directory over SCP
    Copy {
        /// Local file to send
        local: PathBuf,

        /// Remote target as [user@]host:path
        destination: String,

        /// Remote SSH port
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        auth: AuthArgs,

        /// Seconds to wait for the transfer; 0 waits forever
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Run the in-process test server until interrupted
    Serve {
        /// Port to listen on; 0 picks a free one
        #[arg(short, long)]
        port: Option<u16>,

        /// Host key file
        #[arg(short = 'k', long)]
        key_file: Option<PathBuf>,

        /// How exec requests are answered
        #[arg(long, value_enum)]
        handler: Option<HandlerArg>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct AuthArgs {
    /// Private key file to authenticate with
    #[arg(short = 'i', long)]
    pub identity: Option<PathBuf>,

    /// Password to authenticate with
    #[arg(long)]
    pub password: Option<String>,

    /// Authenticate with identities from ssh-agent
    #[arg(long)]
    pub agent: bool,

    /// Skip host key verification (loopback testing only)
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum HandlerArg {
    Echo,
    Shell,
}
