// ABOUTME: In-process SSH server used to exercise the client.
// ABOUTME: Password or key auth, session channels only, exec routed to a pluggable handler.

mod config;
mod dispatch;
mod error;
mod handler;
mod listener;

pub use config::{HostKeySource, RefusedRequest, ServerConfig};
pub use error::{Error, Result};
pub use handler::{
    ChannelIo, CommandHandler, EchoHandler, HandlerError, MockHandler, Output, ShellHandler,
};
pub use listener::{RunningServer, ShutdownHandle, start};
