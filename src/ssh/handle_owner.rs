//! Handle Owner Task
//!
//! This module implements the "single owner" pattern for the SSH Handle.
//!
//! # Architecture
//!
//! Only one task owns the `Handle<ClientHandler>`. All other components
//! communicate with it via `HandleController` which sends commands through
//! an mpsc channel.
//!
//! This avoids:
//! - `Arc<Mutex<Handle>>` lock contention
//! - Deadlocks from holding locks across `.await`
//! - Protocol violations from concurrent Handle access
//!
//! The owner task doubles as the liveness probe: it sends an SSH keepalive
//! on a fixed interval and terminates the connection after consecutive
//! failures, so a dead link is noticed even when no commands are running.

use std::time::Duration;

use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// 心跳间隔（15 秒）
/// 配合 KEEPALIVE_FAIL_THRESHOLD=2，确保 30 秒内检测到断连
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// 心跳连续失败次数阈值，达到后断开连接
const KEEPALIVE_FAIL_THRESHOLD: u32 = 2;

/// 单次心跳探测超时
const KEEPALIVE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one keepalive probe
enum ProbeOutcome {
    /// 连接正常
    Ok,
    /// 超时或软错误（可能是网络延迟，累计计数）
    SoftFailure,
    /// 明确断连，应立即关闭
    Disconnected,
}

/// Commands sent to the Handle Owner Task
pub enum HandleCommand {
    /// Open a session channel (for command execution)
    ChannelOpenSession {
        reply_tx: oneshot::Sender<Result<Channel<Msg>, russh::Error>>,
    },

    /// Disconnect the SSH connection
    Disconnect,
}

/// Controller for sending commands to the Handle Owner Task
///
/// `HandleController` is cheap to clone (it copies two senders). Anyone
/// holding one can open channels on the connection or disconnect it, so it
/// must not leave the process boundary.
#[derive(Clone)]
pub struct HandleController {
    cmd_tx: mpsc::Sender<HandleCommand>,
    /// Broadcast sender for SSH disconnect notification.
    /// Subscribers (like the pool's eviction watcher) listen for this.
    disconnect_tx: broadcast::Sender<()>,
}

impl HandleController {
    /// Open a session channel (for command execution)
    pub async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::ChannelOpenSession { reply_tx })
            .await
            .map_err(|_| SshError::Transport("session closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SshError::Transport("session closed".to_string()))?
            .map_err(|e| SshError::ExecutionChannel(e.to_string()))
    }

    /// Disconnect the SSH connection
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(HandleCommand::Disconnect).await;
    }

    /// Subscribe to SSH disconnect notifications.
    ///
    /// Returns a receiver that yields `()` once when the connection closes.
    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<()> {
        self.disconnect_tx.subscribe()
    }

    /// Check if the Handle Owner Task is still running
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// Spawn the Handle Owner Task
///
/// Consumes ownership of the Handle and returns a HandleController for
/// sending commands.
pub fn spawn_handle_owner_task(handle: Handle<ClientHandler>, key: String) -> HandleController {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HandleCommand>(64);
    let (disconnect_tx, _) = broadcast::channel::<()>(1);
    let disconnect_tx_clone = disconnect_tx.clone();

    tokio::spawn(async move {
        let mut handle = handle; // Move into task, becomes sole owner
        let mut keepalive_failures: u32 = 0;
        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + KEEPALIVE_INTERVAL,
            KEEPALIVE_INTERVAL,
        );
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Handle owner task started for {}", key);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(HandleCommand::ChannelOpenSession { reply_tx }) => {
                            let result = handle.channel_open_session().await;
                            if reply_tx.send(result).is_err() {
                                warn!(
                                    "Caller dropped before receiving channel_open_session result"
                                );
                                // Channel will be dropped, SSH server will close it
                            }
                        }
                        Some(HandleCommand::Disconnect) => {
                            info!("Disconnect requested for {}", key);
                            break;
                        }
                        None => {
                            // All controllers dropped
                            info!("All controllers dropped for {}", key);
                            break;
                        }
                    }
                }

                _ = keepalive.tick() => {
                    match probe(&mut handle, &key).await {
                        ProbeOutcome::Ok => {
                            keepalive_failures = 0;
                        }
                        ProbeOutcome::SoftFailure => {
                            keepalive_failures += 1;
                            if keepalive_failures >= KEEPALIVE_FAIL_THRESHOLD {
                                warn!(
                                    "{} consecutive keepalive failures for {}, closing",
                                    keepalive_failures, key
                                );
                                break;
                            }
                        }
                        ProbeOutcome::Disconnected => {
                            warn!("Keepalive reported disconnect for {}, closing", key);
                            break;
                        }
                    }
                }
            }
        }

        // === Cleanup phase ===
        // Notify all disconnect subscribers (pool eviction watcher, etc.)
        let _ = disconnect_tx_clone.send(());

        // Drain all pending commands, notify callers that connection is closed
        drain_pending_commands(&mut cmd_rx);

        // Disconnect SSH properly with reason
        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
        info!("Handle owner task terminated for {}", key);
    });

    HandleController {
        cmd_tx,
        disconnect_tx,
    }
}

/// One keepalive probe: SSH_MSG_GLOBAL_REQUEST "keepalive@openssh.com"
/// with want_reply=true, bounded by KEEPALIVE_PROBE_TIMEOUT.
async fn probe(handle: &mut Handle<ClientHandler>, key: &str) -> ProbeOutcome {
    debug!("Keepalive probe for {}", key);
    match tokio::time::timeout(KEEPALIVE_PROBE_TIMEOUT, handle.send_keepalive(true)).await {
        Ok(Ok(())) => {
            debug!("Keepalive OK for {}", key);
            ProbeOutcome::Ok
        }
        Ok(Err(e)) => {
            let error_str = format!("{:?}", e);
            if error_str.contains("Disconnect") || error_str.contains("disconnect") {
                ProbeOutcome::Disconnected
            } else {
                warn!(
                    "Keepalive SSH error for {} (treating as soft failure): {:?}",
                    key, e
                );
                ProbeOutcome::SoftFailure
            }
        }
        Err(_) => {
            warn!(
                "Keepalive timeout for {} ({:?})",
                key, KEEPALIVE_PROBE_TIMEOUT
            );
            ProbeOutcome::SoftFailure
        }
    }
}

/// Drain all pending commands, returning a closed error to each
fn drain_pending_commands(cmd_rx: &mut mpsc::Receiver<HandleCommand>) {
    // Close receiver first, prevent new messages
    cmd_rx.close();

    // Drain all messages already in queue
    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            HandleCommand::ChannelOpenSession { reply_tx } => {
                let _ = reply_tx.send(Err(russh::Error::Disconnect));
            }
            HandleCommand::Disconnect => {
                // Already disconnecting, ignore
            }
        }
    }
}
