//! SSH Client implementation using russh
//!
//! [`Connector`] is the seam the pool drives: `connect(config) -> session`.
//! [`SshClient`] is the production implementation; tests substitute a mock.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info};

use super::auth::{self, AuthMethod};
use super::config::SshConfig;
use super::error::SshError;
use super::handle_owner::spawn_handle_owner_task;
use super::session::{RemoteSession, RusshSession};

/// Capability to establish an authenticated remote session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn RemoteSession>, SshError>;
}

/// SSH Client over russh
pub struct SshClient;

#[async_trait]
impl Connector for SshClient {
    /// Connect to the SSH server, authenticate, and hand the Handle to its
    /// owner task. The caller (the pool) bounds this with its own timeout.
    async fn connect(&self, config: &SshConfig) -> Result<Arc<dyn RemoteSession>, SshError> {
        let key = config.key();
        let method = auth::resolve(&config.auth)?;

        let addr = format!("{}:{}", config.host, config.port);
        info!("Connecting to SSH server at {}", addr);

        // Resolve address
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        // Configure SSH client with protocol-level keepalive as the safety
        // net; the owner task's probe is the primary liveness check.
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(config.host.clone(), config.port);

        let mut handle = client::connect(Arc::new(ssh_config), socket_addr, handler)
            .await
            .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        debug!("SSH handshake completed for {}", key);

        // Authenticate
        let authenticated = match &method {
            AuthMethod::Password { password } => handle
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                let key_pair = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|e| SshError::Key(e.to_string()))?;

                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key_pair), None);

                handle
                    .authenticate_publickey(&config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}", key);

        let controller = spawn_handle_owner_task(handle, key.clone());
        Ok(Arc::new(RusshSession::new(
            key,
            controller,
            config.agent_forward,
        )))
    }
}

/// Client handler for russh callbacks
///
/// Host keys are accepted and logged. This is a non-interactive tool server:
/// there is no prompt to confirm a first-contact fingerprint, and rejecting
/// unknown hosts would make every fresh endpoint unusable.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting {} host key for {}:{}",
            server_public_key.algorithm(),
            self.host,
            self.port
        );
        Ok(true)
    }
}
