//! SSH Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// SSH connection configuration for one logical endpoint+user.
///
/// Two configs with the same `(host, port, username)` map to the same pool
/// key; the auth spec only matters the first time a connection is
/// established for that key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Raw authentication parameters, resolved at connect time
    #[serde(default)]
    pub auth: AuthSpec,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Request agent forwarding on exec channels
    #[serde(default = "default_true")]
    pub agent_forward: bool,
}

impl SshConfig {
    /// The pool key for this endpoint+user.
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// What the caller gave us to authenticate with, before resolution.
///
/// All fields optional: an empty spec means "discover a default key".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Path to private key file (~ expanded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,

    /// Optional passphrase for encrypted keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl AuthSpec {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub fn key(key_path: impl Into<String>, passphrase: Option<String>) -> Self {
        Self {
            password: None,
            key_path: Some(key_path.into()),
            passphrase,
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let config: SshConfig =
            serde_json::from_str(r#"{"host": "web01", "username": "deploy"}"#).unwrap();
        assert_eq!(config.key(), "deploy@web01:22");
    }

    #[test]
    fn test_serde_defaults() {
        let config: SshConfig =
            serde_json::from_str(r#"{"host": "h", "username": "u"}"#).unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert!(config.agent_forward);
        assert!(config.auth.password.is_none());
        assert!(config.auth.key_path.is_none());
    }
}
