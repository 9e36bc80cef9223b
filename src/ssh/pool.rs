//! SSH Connection Pool
//!
//! 独立的 SSH 连接池管理，与 RPC 表面完全解耦。
//!
//! # 架构
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  ConnectionPool                                        │
//! │  ┌──────────────────────────────────────────────────┐  │
//! │  │  SessionRecord ("deploy@web01:22")               │  │
//! │  │  ├── attempt: OnceCell<session | error>          │  │
//! │  │  ├── config: SshConfig                           │  │
//! │  │  └── last_used: AtomicI64                        │  │
//! │  └──────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────┘
//!          │ acquire(config)
//!    ┌─────┴──────┬──────────────┐
//!    ▼            ▼              ▼
//!  execute     execute      connections
//! ```
//!
//! # 复用与回收策略
//!
//! - 同一 key 的并发 acquire 共享同一个连接尝试（single-flight）
//! - 连接尝试失败：所有等待者收到同一错误，记录被移除
//! - 空闲超过阈值（默认 30 分钟）：后台清扫任务断开并移除
//! - 传输层断开：owner task 广播事件，守望任务立即移除记录

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::Connector;
use super::config::SshConfig;
use super::error::SshError;
use super::session::RemoteSession;

/// 默认空闲超时时间（30 分钟）
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// 默认清扫周期（5 分钟）
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Environment override for the idle timeout, in seconds.
pub const ENV_IDLE_TIMEOUT: &str = "SSHPOOL_IDLE_TIMEOUT_SECS";

/// Environment override for the sweep interval, in seconds.
pub const ENV_SWEEP_INTERVAL: &str = "SSHPOOL_SWEEP_INTERVAL_SECS";

/// 连接池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// 空闲超时时间（秒）
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// 清扫周期（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
        }
    }
}

impl PoolConfig {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            idle_timeout_secs: env_secs(ENV_IDLE_TIMEOUT, DEFAULT_IDLE_TIMEOUT.as_secs()),
            sweep_interval_secs: env_secs(ENV_SWEEP_INTERVAL, DEFAULT_SWEEP_INTERVAL.as_secs()),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn env_secs(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => secs,
            Err(_) => {
                warn!("Invalid {}={:?}, using default {}s", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// 连接状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 连接中（共享的连接尝试尚未完成）
    Connecting,
    /// 已连接，可复用
    Ready,
    /// 传输层已断开，等待移除
    Closed,
}

/// Snapshot of one pooled connection, for `connections list`.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub key: String,
    pub status: ConnectionState,
    pub last_used: DateTime<Utc>,
    pub idle: Duration,
}

type SessionResult = Result<Arc<dyn RemoteSession>, SshError>;

/// 单个连接记录
///
/// The record is created before its connection exists; the shared `attempt`
/// cell is what concurrent acquirers for the same key attach to. A record
/// whose session died is removed, never revived: a later acquire for the
/// same key gets a brand-new record.
pub struct SessionRecord {
    /// 池 key（user@host:port），创建后不可变
    key: String,

    /// 首次创建此记录时的连接配置（保留用于重连）
    config: SshConfig,

    /// 共享的连接尝试结果
    attempt: OnceCell<SessionResult>,

    /// 最后使用时间（Unix 毫秒），只增不减
    last_used: AtomicI64,

    /// 创建时间
    created_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new(key: String, config: SshConfig) -> Self {
        Self {
            key,
            config,
            attempt: OnceCell::new(),
            last_used: AtomicI64::new(Utc::now().timestamp_millis()),
            created_at: Utc::now(),
        }
    }

    /// 更新活动时间（fetch_max 保证单调递增）
    fn touch(&self) {
        self.last_used
            .fetch_max(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn status(&self) -> ConnectionState {
        match self.attempt.get() {
            None => ConnectionState::Connecting,
            Some(Ok(session)) if session.is_alive() => ConnectionState::Ready,
            Some(_) => ConnectionState::Closed,
        }
    }

    /// Close the underlying session, if the attempt ever produced one.
    async fn close_session(&self) {
        if let Some(Ok(session)) = self.attempt.get() {
            session.close().await;
        }
    }

    /// Ready 且空闲超过阈值才可回收；Connecting 记录由连接超时自行兜底
    fn is_idle_expired(&self, now_ms: i64, idle_timeout: Duration) -> bool {
        if self.status() != ConnectionState::Ready {
            return false;
        }
        let idle_ms = now_ms.saturating_sub(self.last_used.load(Ordering::SeqCst));
        idle_ms > idle_timeout.as_millis() as i64
    }

    fn to_info(&self, now_ms: i64) -> ConnectionInfo {
        let last_used_ms = self.last_used.load(Ordering::SeqCst);
        ConnectionInfo {
            key: self.key.clone(),
            status: self.status(),
            last_used: DateTime::from_timestamp_millis(last_used_ms)
                .unwrap_or(self.created_at),
            idle: Duration::from_millis(now_ms.saturating_sub(last_used_ms).max(0) as u64),
        }
    }
}

/// SSH 连接池
pub struct ConnectionPool {
    /// key → record，唯一的共享可变结构
    records: DashMap<String, Arc<SessionRecord>>,

    /// 传输层能力（生产环境为 SshClient）
    connector: Arc<dyn Connector>,

    /// 连接池配置
    config: PoolConfig,

    /// 清扫任务句柄（shutdown 时取消）
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            records: DashMap::new(),
            connector,
            config,
            sweeper: Mutex::new(None),
        }
    }

    /// Get a ready session for this endpoint+user, connecting lazily.
    ///
    /// Concurrent callers for the same key share one connect attempt and
    /// resolve to the same session (or the same error). A record whose
    /// session has died is discarded and replaced with a fresh attempt.
    pub async fn acquire(
        self: &Arc<Self>,
        config: &SshConfig,
    ) -> Result<Arc<dyn RemoteSession>, SshError> {
        let key = config.key();

        loop {
            // Atomic create-or-attach: the entry API serializes record
            // creation per key, the OnceCell shares the in-flight attempt.
            let record = self
                .records
                .entry(key.clone())
                .or_insert_with(|| Arc::new(SessionRecord::new(key.clone(), config.clone())))
                .clone();

            let pool = Arc::clone(self);
            let attempt_record = Arc::clone(&record);
            let outcome = record
                .attempt
                .get_or_init(|| async move { pool.establish(attempt_record).await })
                .await
                .clone();

            match outcome {
                Ok(session) => {
                    if !session.is_alive() {
                        debug!("Pooled session for {} is no longer alive, discarding", key);
                        self.remove_record(&key, &record);
                        session.close().await;
                        continue;
                    }
                    record.touch();
                    return Ok(session);
                }
                Err(err) => {
                    self.remove_record(&key, &record);
                    return Err(err);
                }
            }
        }
    }

    /// The shared connect attempt: runs exactly once per record.
    async fn establish(self: Arc<Self>, record: Arc<SessionRecord>) -> SessionResult {
        let key = record.key.clone();
        let timeout = record.config.connect_timeout();

        info!("Establishing session for {}", key);

        let session = match tokio::time::timeout(timeout, self.connector.connect(&record.config))
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                warn!("Connect attempt for {} failed: {}", key, err);
                return Err(err);
            }
            Err(_) => {
                // Dropping the connect future aborts the in-flight handshake
                warn!("Connect attempt for {} timed out after {:?}", key, timeout);
                return Err(SshError::ConnectTimeout { key, timeout });
            }
        };

        // 若记录在连接期间被 close/close_all 移除，不要入池
        let still_current = self
            .records
            .get(&key)
            .map(|current| Arc::ptr_eq(current.value(), &record))
            .unwrap_or(false);
        if !still_current {
            session.close().await;
            return Err(SshError::Transport(format!(
                "connection {} was closed while being established",
                key
            )));
        }

        record.touch();
        self.spawn_close_watcher(&record, &session);
        info!("Session for {} is ready", key);
        Ok(session)
    }

    /// Evict the record as soon as the transport reports the session closed,
    /// regardless of idle state.
    fn spawn_close_watcher(
        self: &Arc<Self>,
        record: &Arc<SessionRecord>,
        session: &Arc<dyn RemoteSession>,
    ) {
        let pool = Arc::clone(self);
        let record = Arc::clone(record);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            session.wait_closed().await;
            if pool.remove_record(&record.key, &record) {
                info!("Transport for {} closed, record evicted", record.key);
            }
        });
    }

    /// Remove `record` from the map, but only if it is still the record
    /// registered under `key` — a newer record must never be evicted by a
    /// stale handle.
    fn remove_record(&self, key: &str, record: &Arc<SessionRecord>) -> bool {
        self.records
            .remove_if(key, |_, current| Arc::ptr_eq(current, record))
            .is_some()
    }

    /// Close one connection by key. `NotFound` if the key is not pooled.
    pub async fn close(&self, key: &str) -> Result<(), SshError> {
        let (_, record) = self
            .records
            .remove(key)
            .ok_or_else(|| SshError::NotFound(key.to_string()))?;

        record.close_session().await;
        info!("Connection {} closed and removed", key);
        Ok(())
    }

    /// Close every pooled connection. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let keys: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();

        let mut closed = 0;
        for key in keys {
            if let Some((_, record)) = self.records.remove(&key) {
                record.close_session().await;
                closed += 1;
            }
        }

        if closed > 0 {
            info!("Closed {} pooled connection(s)", closed);
        }
        closed
    }

    /// Snapshot of all pooled connections. Does not mutate anything.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let now_ms = Utc::now().timestamp_millis();
        self.records
            .iter()
            .map(|entry| entry.value().to_info(now_ms))
            .collect()
    }

    /// 获取连接数量
    pub fn connection_count(&self) -> usize {
        self.records.len()
    }

    /// One sweep pass: evict every Ready record idle beyond the threshold.
    /// Returns the number of evicted records. Safe to run concurrently with
    /// acquire/close; a record acquired mid-sweep is skipped by the
    /// `remove_if` identity check.
    pub async fn sweep(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let now_ms = Utc::now().timestamp_millis();

        let expired: Vec<(String, Arc<SessionRecord>)> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_idle_expired(now_ms, idle_timeout))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut evicted = 0;
        for (key, record) in expired {
            // Re-check identity at removal: an acquire may have raced us
            if self.remove_record(&key, &record) {
                info!("Connection {} idle timeout expired, disconnecting", key);
                record.close_session().await;
                evicted += 1;
            }
        }

        evicted
    }

    /// Start the periodic idle sweeper. Cancelled by `shutdown`.
    pub async fn spawn_sweeper(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let interval = self.config.sweep_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + interval,
                interval,
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let evicted = pool.sweep().await;
                if evicted > 0 {
                    debug!("Idle sweep evicted {} connection(s)", evicted);
                }
            }
        });

        let mut sweeper = self.sweeper.lock().await;
        if let Some(old) = sweeper.take() {
            old.abort();
        }
        *sweeper = Some(handle);
    }

    /// Stop the sweeper and close everything. Returns the number of
    /// connections closed.
    pub async fn shutdown(&self) -> usize {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
            debug!("Idle sweeper stopped");
        }
        self.close_all().await
    }
}
