//! SSH Error types
//!
//! Variants are `Clone` on purpose: a connect attempt is shared by every
//! caller waiting on the same pool key, so the same failure must be
//! deliverable to all of them.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SshError {
    /// No usable credential: no password, no key path, no discoverable key.
    #[error("No authentication method available: {0}")]
    AuthResolution(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Key error: {0}")]
    Key(String),

    /// The connect attempt for `key` did not reach Ready in time.
    #[error("Connection to {key} timed out after {timeout:?}")]
    ConnectTimeout { key: String, timeout: Duration },

    /// Network/protocol failure on an established session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The command channel failed before producing an exit status.
    /// Distinct from a non-zero exit code, which is not an error.
    #[error("Execution channel error: {0}")]
    ExecutionChannel(String),

    #[error("Connection not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for SshError {
    fn from(err: std::io::Error) -> Self {
        SshError::Io(err.to_string())
    }
}
