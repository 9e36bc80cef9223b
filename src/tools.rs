//! Tool façade
//!
//! Translates the two tool operations into pool/executor calls and formats
//! the results for the wire. Field names follow the tool schema (camelCase);
//! everything here is thin glue over `ssh::pool` and `ssh::exec`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{
    RpcError, ERR_AUTH, ERR_CONNECT, ERR_EXEC, ERR_INTERNAL, ERR_INVALID_PARAMS,
    ERR_METHOD_NOT_FOUND, ERR_NOT_FOUND, ERR_TIMEOUT, ERR_TRANSPORT,
};
use crate::ssh::{
    AuthSpec, CommandExecutor, ConnectionPool, ConnectionState, SshConfig, SshError,
};

/// `execute` tool parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteParams {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Path to private key file; absent means auto-discover
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    pub command: String,
    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub agent_forward: bool,
}

impl ExecuteParams {
    fn ssh_config(&self) -> SshConfig {
        SshConfig {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth: AuthSpec {
                password: self.password.clone(),
                key_path: self.private_key_path.clone(),
                passphrase: self.passphrase.clone(),
            },
            connect_timeout_ms: self.timeout,
            agent_forward: self.agent_forward,
        }
    }
}

/// `execute` tool result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub command: String,
    /// `user@host:port`
    pub host: String,
    pub exit_code: Option<u32>,
    pub stdout: String,
    pub stderr: String,
    /// `exitCode == 0`; non-zero exit is a structured failure, not an error
    pub success: bool,
}

/// `connections` tool parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsParams {
    pub action: ConnectionsAction,
    /// Required only for `close`
    #[serde(default)]
    pub connection_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionsAction {
    List,
    Close,
    CloseAll,
}

/// One entry of `connections list`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connection_key: String,
    pub is_connected: bool,
    /// ISO 8601 timestamp
    pub last_used: String,
    pub minutes_idle: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub connections: Vec<ConnectionStatus>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResult {
    pub connection_key: String,
    pub closed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseAllResult {
    pub closed: usize,
}

fn default_port() -> u16 {
    22
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

/// Dispatches tool calls onto the pool and executor.
pub struct ToolHandler {
    pool: Arc<ConnectionPool>,
    executor: CommandExecutor,
}

impl ToolHandler {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        let executor = CommandExecutor::new(Arc::clone(&pool));
        Self { pool, executor }
    }

    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "execute" => {
                let params: ExecuteParams = parse_params(params)?;
                self.execute(params).await
            }
            "connections" => {
                let params: ConnectionsParams = parse_params(params)?;
                self.connections(params).await
            }
            other => Err(RpcError::new(
                ERR_METHOD_NOT_FOUND,
                format!("unknown tool: {}", other),
            )),
        }
    }

    async fn execute(&self, params: ExecuteParams) -> Result<Value, RpcError> {
        let config = params.ssh_config();
        let output = self
            .executor
            .execute(&config, &params.command)
            .await
            .map_err(rpc_error)?;

        to_json(ExecuteResult {
            command: params.command,
            host: config.key(),
            success: output.exit_code == Some(0),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn connections(&self, params: ConnectionsParams) -> Result<Value, RpcError> {
        match params.action {
            ConnectionsAction::List => {
                let connections: Vec<ConnectionStatus> = self
                    .pool
                    .list()
                    .into_iter()
                    .map(|info| ConnectionStatus {
                        connection_key: info.key,
                        is_connected: info.status == ConnectionState::Ready,
                        last_used: info.last_used.to_rfc3339(),
                        minutes_idle: info.idle.as_secs() / 60,
                    })
                    .collect();
                let count = connections.len();
                to_json(ListResult { connections, count })
            }
            ConnectionsAction::Close => {
                let connection_key = params.connection_key.ok_or_else(|| {
                    RpcError::new(
                        ERR_INVALID_PARAMS,
                        "connectionKey is required for action \"close\"",
                    )
                })?;
                self.pool.close(&connection_key).await.map_err(rpc_error)?;
                to_json(CloseResult {
                    connection_key,
                    closed: true,
                })
            }
            ConnectionsAction::CloseAll => to_json(CloseAllResult {
                closed: self.pool.close_all().await,
            }),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params)
        .map_err(|e| RpcError::new(ERR_INVALID_PARAMS, format!("invalid params: {}", e)))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value)
        .map_err(|e| RpcError::new(ERR_INTERNAL, format!("failed to serialize result: {}", e)))
}

/// Map core errors to wire errors, preserving the stage distinction the
/// caller needs: could-not-connect vs connected-but-channel-failed.
fn rpc_error(err: SshError) -> RpcError {
    let code = match &err {
        SshError::AuthResolution(_)
        | SshError::AuthenticationFailed(_)
        | SshError::Key(_) => ERR_AUTH,
        SshError::ConnectionFailed(_) => ERR_CONNECT,
        SshError::ConnectTimeout { .. } => ERR_TIMEOUT,
        SshError::Transport(_) | SshError::Io(_) => ERR_TRANSPORT,
        SshError::NotFound(_) => ERR_NOT_FOUND,
        SshError::ExecutionChannel(_) => ERR_EXEC,
    };
    RpcError::new(code, err.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ssh::pool::test_support::{MockBehavior, MockConnector};
    use crate::ssh::PoolConfig;

    fn test_handler(behavior: MockBehavior) -> (ToolHandler, Arc<MockConnector>) {
        let connector = MockConnector::new(behavior);
        let pool = Arc::new(ConnectionPool::new(
            connector.clone(),
            PoolConfig::default(),
        ));
        (ToolHandler::new(pool), connector)
    }

    fn execute_params(command: &str) -> Value {
        json!({
            "host": "h",
            "username": "alice",
            "password": "pw",
            "command": command,
        })
    }

    #[test]
    fn test_execute_params_defaults() {
        let params: ExecuteParams =
            serde_json::from_value(execute_params("echo hi")).unwrap();
        assert_eq!(params.port, 22);
        assert_eq!(params.timeout, 10_000);
        assert!(params.agent_forward);
        assert!(params.private_key_path.is_none());
    }

    #[test]
    fn test_execute_params_wire_names() {
        let params: ExecuteParams = serde_json::from_value(json!({
            "host": "h",
            "username": "alice",
            "privateKeyPath": "~/.ssh/deploy_key",
            "agentForward": false,
            "command": "true",
        }))
        .unwrap();
        assert_eq!(params.private_key_path.as_deref(), Some("~/.ssh/deploy_key"));
        assert!(!params.agent_forward);
    }

    #[tokio::test]
    async fn test_execute_success_mapping() {
        let (handler, _connector) = test_handler(MockBehavior::Connect);

        let result = handler
            .dispatch("execute", execute_params("echo hi"))
            .await
            .unwrap();

        assert_eq!(result["host"], "alice@h:22");
        assert_eq!(result["command"], "echo hi");
        assert_eq!(result["exitCode"], 0);
        assert_eq!(result["stdout"], "hi\n");
        assert_eq!(result["success"], true);
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit_is_structured_failure() {
        let (handler, _connector) = test_handler(MockBehavior::Connect);

        let result = handler
            .dispatch("execute", execute_params("exit 1"))
            .await
            .unwrap();

        assert_eq!(result["exitCode"], 1);
        assert_eq!(result["success"], false);
    }

    #[tokio::test]
    async fn test_execute_auth_failure_maps_to_auth_code() {
        let (handler, _connector) = test_handler(MockBehavior::Fail("denied"));

        let err = handler
            .dispatch("execute", execute_params("echo hi"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ERR_AUTH);
    }

    #[tokio::test]
    async fn test_connections_list_after_execute() {
        let (handler, _connector) = test_handler(MockBehavior::Connect);
        handler
            .dispatch("execute", execute_params("echo hi"))
            .await
            .unwrap();

        let result = handler
            .dispatch("connections", json!({"action": "list"}))
            .await
            .unwrap();

        assert_eq!(result["count"], 1);
        let entry = &result["connections"][0];
        assert_eq!(entry["connectionKey"], "alice@h:22");
        assert_eq!(entry["isConnected"], true);
        assert_eq!(entry["minutesIdle"], 0);
        assert!(entry["lastUsed"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_connections_close_requires_key() {
        let (handler, _connector) = test_handler(MockBehavior::Connect);

        let err = handler
            .dispatch("connections", json!({"action": "close"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_connections_close_unknown_key() {
        let (handler, _connector) = test_handler(MockBehavior::Connect);

        let err = handler
            .dispatch(
                "connections",
                json!({"action": "close", "connectionKey": "bob@h:22"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ERR_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connections_close_all_counts() {
        let (handler, _connector) = test_handler(MockBehavior::Connect);
        handler
            .dispatch("execute", execute_params("echo hi"))
            .await
            .unwrap();

        let result = handler
            .dispatch("connections", json!({"action": "close_all"}))
            .await
            .unwrap();
        assert_eq!(result["closed"], 1);

        let listed = handler
            .dispatch("connections", json!({"action": "list"}))
            .await
            .unwrap();
        assert_eq!(listed["count"], 0);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (handler, _connector) = test_handler(MockBehavior::Connect);

        let err = handler.dispatch("transfer", json!({})).await.unwrap_err();
        assert_eq!(err.code, ERR_METHOD_NOT_FOUND);
    }
}
