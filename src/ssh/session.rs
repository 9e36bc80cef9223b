//! Remote session abstraction and the russh-backed implementation
//!
//! A session is one authenticated connection. Each `exec` opens its own
//! command channel, so concurrent executions on the same session do not
//! block one another; their streams never interleave.

use async_trait::async_trait;
use russh::ChannelMsg;
use tracing::{debug, warn};

use super::error::SshError;
use super::handle_owner::HandleController;

/// Captured result of one remote command.
///
/// `exit_code` is `None` when the remote process was terminated by a signal
/// instead of exiting. That is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<u32>,
}

/// An established, authenticated remote session owned by the pool.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command on a fresh channel and collect its output.
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError>;

    /// Whether the underlying transport is still up.
    fn is_alive(&self) -> bool;

    /// Terminate the session.
    async fn close(&self);

    /// Resolve once the transport reports the session closed.
    async fn wait_closed(&self);
}

/// Session over a russh connection, held behind its Handle Owner Task.
pub struct RusshSession {
    key: String,
    controller: HandleController,
    agent_forward: bool,
}

impl RusshSession {
    pub fn new(key: String, controller: HandleController, agent_forward: bool) -> Self {
        Self {
            key,
            controller,
            agent_forward,
        }
    }
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        // Open a new session channel for this command
        let mut channel = self.controller.open_session_channel().await?;

        if self.agent_forward {
            // Best-effort: servers without an agent socket just refuse it
            if let Err(e) = channel.agent_forward(false).await {
                debug!("Agent forward request failed on {}: {}", self.key, e);
            }
        }

        debug!("Exec on {}: {}", self.key, command);

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ExecutionChannel(format!("Failed to execute command: {}", e)))?;

        // Collect output until the channel closes
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: Option<u32> = None;
        let mut closed_cleanly = false;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    // ext=1 is stderr
                    stderr.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    // Killed by signal: no exit status will arrive
                    debug!("Command on {} terminated by signal {:?}", self.key, signal_name);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => {
                    closed_cleanly = true;
                    break;
                }
                Some(_other) => {
                    // Ignore other messages (WindowAdjusted, Success, etc.)
                }
                None => {
                    // Channel stream ended
                    break;
                }
            }
        }

        // A channel that vanished without EOF and without an exit status is
        // a transport failure, not a command result.
        if !closed_cleanly && exit_code.is_none() {
            warn!("Session {} dropped during execution", self.key);
            return Err(SshError::Transport(format!(
                "session {} dropped during execution",
                self.key
            )));
        }

        debug!(
            "Exec on {} finished: exit={:?} stdout_len={} stderr_len={}",
            self.key,
            exit_code,
            stdout.len(),
            stderr.len()
        );

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    fn is_alive(&self) -> bool {
        self.controller.is_connected()
    }

    async fn close(&self) {
        self.controller.disconnect().await;
    }

    async fn wait_closed(&self) {
        let mut rx = self.controller.subscribe_disconnect();
        if !self.controller.is_connected() {
            return;
        }
        // Err means the owner task is gone, which is a close too
        let _ = rx.recv().await;
    }
}
