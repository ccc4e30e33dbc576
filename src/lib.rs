// ABOUTME: Library root for sshclient - deadline-bounded remote commands and SCP pushes.
// ABOUTME: The main binary is in main.rs; the test server lives in `server`.

pub mod config;
pub mod error;
pub mod scp;
pub mod server;
pub mod ssh;
