//! Integration test entry point
//!
//! Run with: PROBE_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - PROBE_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - PROBE_TEST_MYSQL_HOST: MySQL host (default: 127.0.0.1)
//! - PROBE_TEST_MYSQL_PORT: MySQL port (default: 3306)
//! - PROBE_TEST_MYSQL_USER: MySQL user (default: root)
//! - PROBE_TEST_MYSQL_PASS: MySQL password (default: empty)
//! - PROBE_TEST_REPLICA_PORT: Port of a replica on the same host (optional)


use std::env;
use std::sync::Arc;

use athena_probe::config::BackendConfig;
use athena_probe::health::ProbeContext;
use athena_probe::pool::{StatelessPool, StatelessPoolConfig};
use mysql::prelude::*;
use mysql::{OptsBuilder, Pool, PooledConn};

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("PROBE_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set PROBE_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// MySQL connection settings from the environment
#[derive(Debug, Clone)]
pub struct MysqlTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

pub fn get_mysql_config() -> MysqlTestConfig {
    MysqlTestConfig {
        host: env::var("PROBE_TEST_MYSQL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("PROBE_TEST_MYSQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306),
        user: env::var("PROBE_TEST_MYSQL_USER").unwrap_or_else(|_| "root".to_string()),
        password: env::var("PROBE_TEST_MYSQL_PASS").unwrap_or_default(),
    }
}

/// Same host and credentials, replica port, if one is configured
pub fn get_replica_config() -> Option<MysqlTestConfig> {
    let port = env::var("PROBE_TEST_REPLICA_PORT").ok()?.parse().ok()?;
    Some(MysqlTestConfig {
        port,
        ..get_mysql_config()
    })
}

/// What the server says about itself, read with an independent client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerRole {
    pub read_only: bool,
    pub has_slave_status: bool,
}

impl MysqlTestConfig {
    pub fn conn(&self) -> PooledConn {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(&self.host))
            .tcp_port(self.port)
            .user(Some(&self.user))
            .pass(Some(&self.password))
            .db_name(Some("information_schema"));
        Pool::new(opts)
            .expect("Failed to create connection pool")
            .get_conn()
            .expect("Failed to get connection")
    }

    pub fn url(&self) -> String {
        format!(
            "{}:{}@tcp({}:{})/information_schema",
            self.user, self.password, self.host, self.port
        )
    }

    pub fn role(&self) -> ServerRole {
        let mut conn = self.conn();
        let read_only: Option<i64> = conn
            .query_first("SELECT @@global.read_only")
            .expect("SELECT @@global.read_only should succeed");
        let status: Vec<mysql::Row> = conn
            .query("SHOW SLAVE STATUS")
            .expect("SHOW SLAVE STATUS should succeed");
        ServerRole {
            read_only: read_only == Some(1),
            has_slave_status: !status.is_empty(),
        }
    }

    /// Probe context backed by the real connection pool
    pub fn probe(&self, slave_lag: i64) -> Arc<ProbeContext> {
        let backend = BackendConfig::from_url(&self.url()).expect("test URL should parse");
        let pool = Arc::new(StatelessPool::new(
            Arc::new(backend),
            StatelessPoolConfig::default(),
        ));
        Arc::new(ProbeContext::new(pool, slave_lag))
    }
}
