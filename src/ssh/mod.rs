// ABOUTME: SSH client module: connections, sessions, and deadline-bound execution.
// ABOUTME: Supports password, key, and agent authentication with known_hosts verification.

mod client;
mod error;
mod exec;
mod output;
pub(crate) mod session;

pub use client::{AuthMethod, ConnectConfig, Connection, HostKeyPolicy, parse_address};
pub use error::{Error, Result};
pub(crate) use exec::race_deadline;
pub use exec::{Executor, execute, execute_with_agent, execute_with_key, execute_with_password};
pub use output::{CommandError, Results};
pub use session::{Session, TerminalRequest};
