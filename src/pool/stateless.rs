use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::BackendConfig;
use crate::health::QueryExecutor;
use crate::protocol::ResultSet;

use super::connection::{ConnectionError, PooledConnection};

/// Configuration for stateless pool
#[derive(Debug, Clone)]
pub struct StatelessPoolConfig {
    /// Maximum number of idle connections to keep
    pub max_idle: usize,
    /// Maximum connection age before recycling
    pub max_age: Duration,
    /// Maximum idle time before closing
    pub max_idle_time: Duration,
}

impl Default for StatelessPoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 4,
            max_age: Duration::from_secs(3600),      // 1 hour
            max_idle_time: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// A pool for stateless connections to the probed instance
///
/// Connections are borrowed for one query and returned right after.
/// Only the idle queue is locked; queries on borrowed connections run
/// concurrently, so the pool can be shared freely behind an `Arc`.
pub struct StatelessPool {
    config: StatelessPoolConfig,
    backend_config: Arc<BackendConfig>,
    idle: Mutex<VecDeque<PooledConnection>>,
}

impl StatelessPool {
    pub fn new(backend_config: Arc<BackendConfig>, pool_config: StatelessPoolConfig) -> Self {
        Self {
            config: pool_config,
            backend_config,
            idle: Mutex::new(VecDeque::new()),
        }
    }

    /// Get a connection from the pool
    ///
    /// Returns an idle connection if available, otherwise creates a new one.
    pub async fn get(&self) -> Result<PooledConnection, ConnectionError> {
        self.checkout().await.map(|(conn, _)| conn)
    }

    /// Like `get`, also reporting whether the connection came from the idle queue
    async fn checkout(&self) -> Result<(PooledConnection, bool), ConnectionError> {
        {
            let mut idle = self.idle.lock().await;
            while let Some(mut conn) = idle.pop_front() {
                if conn.is_expired(self.config.max_age) {
                    debug!("Connection expired, discarding");
                    continue;
                }

                if conn.is_idle_too_long(self.config.max_idle_time) {
                    debug!("Connection idle too long, discarding");
                    continue;
                }

                conn.acquire();
                debug!("Reusing idle connection");
                return Ok((conn, true));
            }
        }

        Ok((self.open().await?, false))
    }

    async fn open(&self) -> Result<PooledConnection, ConnectionError> {
        debug!(addr = %self.backend_addr(), "Creating new connection");
        let mut conn = PooledConnection::connect(&self.backend_config).await?;
        conn.acquire();
        Ok(conn)
    }

    /// Return a connection to the pool
    ///
    /// Broken or expired connections are dropped, as is anything beyond
    /// `max_idle`.
    pub async fn put(&self, mut conn: PooledConnection) {
        conn.release();

        if !conn.is_usable() {
            debug!("Connection not usable, discarding");
            return;
        }

        if conn.is_expired(self.config.max_age) {
            debug!("Connection expired, discarding");
            conn.quit().await;
            return;
        }

        let mut idle = self.idle.lock().await;

        if idle.len() >= self.config.max_idle {
            debug!("Pool full, discarding connection");
            drop(idle);
            conn.quit().await;
            return;
        }

        idle.push_back(conn);
        debug!(idle_count = idle.len(), "Returned connection to pool");
    }

    /// Borrow a connection and ping it; used to report reachability at startup
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        let mut conn = self.get().await?;
        let alive = conn.ping().await;
        self.put(conn).await;
        if alive {
            Ok(())
        } else {
            Err(ConnectionError::Protocol("ping failed".into()))
        }
    }

    /// Get current number of idle connections
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Close all idle connections
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.idle.lock().await.drain(..).collect();
        for conn in drained {
            conn.quit().await;
        }
        debug!("Closed all idle connections");
    }

    /// Get backend address (host:port) for this pool
    pub fn backend_addr(&self) -> String {
        self.backend_config.addr()
    }
}

#[async_trait]
impl QueryExecutor for StatelessPool {
    async fn query(&self, sql: &str) -> Result<ResultSet, ConnectionError> {
        let (mut conn, reused) = self.checkout().await?;
        let mut result = conn.query(sql).await;

        // An idle connection the server already closed (wait_timeout,
        // restart) fails before any reply; run once more on a fresh one.
        if reused
            && conn.failed_before_response()
            && matches!(
                result,
                Err(ConnectionError::Io(_) | ConnectionError::Disconnected)
            )
        {
            debug!(addr = %self.backend_addr(), "Idle connection went stale, reconnecting");
            drop(conn);
            conn = self.open().await?;
            result = conn.query(sql).await;
        }

        self.put(conn).await;
        result
    }
}
