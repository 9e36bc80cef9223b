//! Credential resolution
//!
//! Turns the caller-supplied [`AuthSpec`] into a concrete authentication
//! method, in order of precedence:
//! - explicit password
//! - explicit private key path (tilde-expanded, must exist)
//! - first discoverable default key under `~/.ssh`
//!
//! Resolution is attempt-scoped: it runs once per connect attempt and its
//! failure fails that attempt only.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::config::AuthSpec;
use super::error::SshError;

/// A resolved credential, ready for the transport handshake.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },

    /// SSH key authentication
    Key {
        /// Path to private key file
        key_path: PathBuf,
        /// Optional passphrase for encrypted keys
        passphrase: Option<String>,
    },
}

/// Default key file names, in preference order.
const DEFAULT_KEY_NAMES: [&str; 3] = [
    "id_ed25519", // Prefer Ed25519 (modern, fast)
    "id_ecdsa",   // Then ECDSA
    "id_rsa",     // Then RSA (legacy but common)
];

/// Resolve an auth spec into a usable credential.
pub fn resolve(spec: &AuthSpec) -> Result<AuthMethod, SshError> {
    if let Some(password) = &spec.password {
        return Ok(AuthMethod::Password {
            password: password.clone(),
        });
    }

    if let Some(key_path) = &spec.key_path {
        let key_path = expand_tilde(Path::new(key_path));
        if !key_path.exists() {
            return Err(SshError::AuthResolution(format!(
                "key file not found: {}",
                key_path.display()
            )));
        }
        debug!("Using explicit key: {:?}", key_path);
        return Ok(AuthMethod::Key {
            key_path,
            passphrase: spec.passphrase.clone(),
        });
    }

    discover_default_key(&default_ssh_dir(), spec.passphrase.clone())
}

/// Search `dir` for a conventional key file and return the first found.
fn discover_default_key(
    dir: &Path,
    passphrase: Option<String>,
) -> Result<AuthMethod, SshError> {
    for name in DEFAULT_KEY_NAMES {
        let path = dir.join(name);
        if path.exists() {
            info!("Discovered default key: {:?}", path);
            return Ok(AuthMethod::Key {
                key_path: path,
                passphrase,
            });
        }
    }

    Err(SshError::AuthResolution(format!(
        "no password given and no private key found in {} (tried {})",
        dir.display(),
        DEFAULT_KEY_NAMES.join(", ")
    )))
}

fn default_ssh_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".ssh")
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde(Path::new("~/.ssh/id_rsa"));
        assert!(!path.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_password_takes_precedence() {
        let spec = AuthSpec {
            password: Some("secret".to_string()),
            key_path: Some("/nonexistent/key".to_string()),
            passphrase: None,
        };
        match resolve(&spec).unwrap() {
            AuthMethod::Password { password } => assert_eq!(password, "secret"),
            other => panic!("expected password auth, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_key_must_exist() {
        let spec = AuthSpec::key("/definitely/not/a/key", None);
        let err = resolve(&spec).unwrap_err();
        assert!(matches!(err, SshError::AuthResolution(_)));
    }

    #[test]
    fn test_discovery_prefers_ed25519() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("id_rsa"), "rsa").unwrap();
        std::fs::write(dir.path().join("id_ed25519"), "ed").unwrap();

        match discover_default_key(dir.path(), None).unwrap() {
            AuthMethod::Key { key_path, .. } => {
                assert_eq!(key_path, dir.path().join("id_ed25519"));
            }
            other => panic!("expected key auth, got {:?}", other),
        }
    }

    #[test]
    fn test_discovery_falls_back_to_rsa() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("id_rsa"), "rsa").unwrap();

        match discover_default_key(dir.path(), Some("pp".to_string())).unwrap() {
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                assert_eq!(key_path, dir.path().join("id_rsa"));
                assert_eq!(passphrase.as_deref(), Some("pp"));
            }
            other => panic!("expected key auth, got {:?}", other),
        }
    }

    #[test]
    fn test_discovery_empty_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_default_key(dir.path(), None).unwrap_err();
        assert!(matches!(err, SshError::AuthResolution(_)));
    }
}
