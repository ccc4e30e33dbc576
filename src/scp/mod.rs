// ABOUTME: SCP sink protocol: push one file to a remote path.
// ABOUTME: The codec is pure; the transfer drives it over a Session's channel.

pub mod codec;
mod transfer;

pub use codec::{ControlLine, decode_status_message, sink_command};
pub use transfer::{copy_file, push};
