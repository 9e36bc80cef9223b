//! SSH module - pooled connections and remote command execution
//!
//! This module provides the core SSH functionality using the russh library.
//!
//! # Features
//! - Password and key authentication, with default-key discovery
//! - Connection pool keyed by `user@host:port` with single-flight connects
//! - Idle-timeout eviction (see `pool`)
//! - Per-command channels over shared sessions
//! - Keepalive-based link death detection

pub mod auth;
mod client;
pub mod config;
mod error;
mod exec;
mod handle_owner;
pub mod pool;
mod session;

pub use auth::AuthMethod;
pub use client::{ClientHandler, Connector, SshClient};
pub use config::{AuthSpec, SshConfig};
pub use error::SshError;
pub use exec::CommandExecutor;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use pool::{ConnectionInfo, ConnectionPool, ConnectionState, PoolConfig};
pub use session::{ExecOutput, RemoteSession, RusshSession};
