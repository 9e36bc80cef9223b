//! sshpool — pooled SSH command execution behind a line-delimited JSON tool
//! protocol.
//!
//! Two tools are exposed: `execute` (run a command on a remote host) and
//! `connections` (list/close pooled sessions). Connections are established
//! lazily, reused per `user@host:port`, evicted when idle, and torn down as
//! a group on shutdown. See the `ssh` module for the core; `protocol`,
//! `server` and `tools` are the RPC glue around it.

pub mod protocol;
pub mod server;
pub mod ssh;
pub mod tools;
