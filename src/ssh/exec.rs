//! Command executor
//!
//! Bridges the pool and a single remote command: acquire a ready session
//! (connecting lazily if needed), run the command on its own channel, and
//! hand back whatever the remote produced. Exit codes are data here —
//! success semantics belong to the caller. No retries: a failed execution
//! is reported, not repeated.

use std::sync::Arc;

use tracing::debug;

use super::config::SshConfig;
use super::error::SshError;
use super::pool::ConnectionPool;
use super::session::ExecOutput;

pub struct CommandExecutor {
    pool: Arc<ConnectionPool>,
}

impl CommandExecutor {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Run `command` on the endpoint described by `config`.
    ///
    /// Runs until the remote process exits or the session fails; callers
    /// wanting an execution timeout must layer one on top.
    pub async fn execute(
        &self,
        config: &SshConfig,
        command: &str,
    ) -> Result<ExecOutput, SshError> {
        let session = self.pool.acquire(config).await?;

        debug!("Executing on {}: {}", config.key(), command);
        let output = session.exec(command).await?;
        debug!(
            "Execution on {} finished with exit={:?}",
            config.key(),
            output.exit_code
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::super::config::AuthSpec;
    use super::super::pool::test_support::{MockBehavior, MockConnector};
    use super::super::pool::PoolConfig;
    use super::*;

    fn test_setup(behavior: MockBehavior) -> (CommandExecutor, Arc<ConnectionPool>, Arc<MockConnector>) {
        let connector = MockConnector::new(behavior);
        let pool = Arc::new(ConnectionPool::new(
            connector.clone(),
            PoolConfig::default(),
        ));
        (CommandExecutor::new(Arc::clone(&pool)), pool, connector)
    }

    fn test_config() -> SshConfig {
        SshConfig {
            host: "h".to_string(),
            port: 22,
            username: "alice".to_string(),
            auth: AuthSpec::password("pw"),
            connect_timeout_ms: 1_000,
            agent_forward: false,
        }
    }

    #[tokio::test]
    async fn test_execute_collects_output() {
        let (executor, _pool, _connector) = test_setup(MockBehavior::Connect);

        let output = executor.execute(&test_config(), "echo hi").await.unwrap();
        assert_eq!(output.stdout, "hi\n");
        assert_eq!(output.stderr, "");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let (executor, _pool, _connector) = test_setup(MockBehavior::Connect);

        let output = executor.execute(&test_config(), "exit 3").await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_signal_termination_has_no_exit_code() {
        let (executor, _pool, _connector) = test_setup(MockBehavior::Connect);

        let output = executor.execute(&test_config(), "signal").await.unwrap();
        assert_eq!(output.exit_code, None);
    }

    #[tokio::test]
    async fn test_sequential_executes_reuse_connection() {
        let (executor, _pool, connector) = test_setup(MockBehavior::Connect);
        let config = test_config();

        executor.execute(&config, "echo one").await.unwrap();
        executor.execute(&config, "echo two").await.unwrap();

        assert_eq!(connector.attempts(), 1);
        assert_eq!(
            connector
                .last_session()
                .exec_count
                .load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn test_channel_failure_keeps_session_pooled() {
        let (executor, pool, _connector) = test_setup(MockBehavior::Connect);
        let config = test_config();

        let err = executor.execute(&config, "fail").await.unwrap_err();
        assert!(matches!(err, SshError::ExecutionChannel(_)));

        // The session itself is still alive and pooled
        assert_eq!(pool.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let (executor, pool, _connector) = test_setup(MockBehavior::Fail("denied"));

        let err = executor.execute(&test_config(), "echo hi").await.unwrap_err();
        assert!(matches!(err, SshError::AuthenticationFailed(_)));
        assert_eq!(pool.connection_count(), 0);
    }
}
