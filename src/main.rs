//! sshpool binary entry point.
//!
//! Logging goes to stderr; stdout carries the JSON protocol. On SIGINT or
//! SIGTERM (or stdin EOF) the pool is shut down: the idle sweeper stops and
//! every pooled connection is disconnected before the process exits.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sshpool::server;
use sshpool::ssh::{ConnectionPool, PoolConfig, SshClient};
use sshpool::tools::ToolHandler;

/// Initialize logging
fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = ctrl_c.await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() {
    init_logging();

    info!("Starting sshpool v{}", env!("CARGO_PKG_VERSION"));

    let pool_config = PoolConfig::from_env();
    info!(
        "Pool config: idle timeout {}s, sweep interval {}s",
        pool_config.idle_timeout_secs, pool_config.sweep_interval_secs
    );

    let pool = Arc::new(ConnectionPool::new(Arc::new(SshClient), pool_config));
    pool.spawn_sweeper().await;

    let tools = Arc::new(ToolHandler::new(Arc::clone(&pool)));

    tokio::select! {
        _ = server::serve(tools) => {
            info!("Input closed, shutting down");
        }
        _ = shutdown_signal() => {
            info!("Termination signal received, shutting down");
        }
    }

    let closed = pool.shutdown().await;
    info!("Closed {} pooled connection(s), exiting", closed);
}
