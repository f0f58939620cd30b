//! Replication health checks
//!
//! This module provides:
//! - The `QueryExecutor` seam the checks run against
//! - Row decoding for `SHOW SLAVE STATUS`
//! - Master check: writable and not replicating from anyone
//! - Slave check: read-only, both replication threads running, lag in bounds

mod decoder;
mod master;
mod slave;

#[cfg(test)]
pub(crate) mod scripted;

pub use decoder::{decode_row, StatusRow};
pub use master::{is_master, MasterError};
pub use slave::{is_slave, SlaveError};

use std::num::ParseIntError;
use std::sync::Arc;

use async_trait::async_trait;

use crate::pool::ConnectionError;
use crate::protocol::ResultSet;

pub(crate) const READ_ONLY_SQL: &str = "SELECT @@global.read_only AS read_only";
pub(crate) const SLAVE_STATUS_SQL: &str = "SHOW SLAVE STATUS";

/// Anything that can run a text query against the probed instance
///
/// Implementations must be safe to share between concurrent requests.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query(&self, sql: &str) -> Result<ResultSet, ConnectionError>;
}

/// Immutable state shared by both checks
pub struct ProbeContext {
    db: Arc<dyn QueryExecutor>,
    /// Maximum tolerated Seconds_Behind_Master
    slave_lag: i64,
}

impl ProbeContext {
    pub fn new(db: Arc<dyn QueryExecutor>, slave_lag: i64) -> Self {
        Self { db, slave_lag }
    }

    pub fn db(&self) -> &dyn QueryExecutor {
        self.db.as_ref()
    }

    pub fn slave_lag(&self) -> i64 {
        self.slave_lag
    }
}

/// Failures that are not a health classification: the server could not be
/// asked, or answered something unusable. Reported verbatim.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("No records")]
    NoRecords,
    #[error("{0} is NULL")]
    NullColumn(String),
    #[error("invalid integer {value:?}: {source}")]
    ParseInt {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Read `@@global.read_only` as an integer
pub(crate) async fn read_only_flag(db: &dyn QueryExecutor) -> Result<i64, ProbeError> {
    let mut rs = db.query(READ_ONLY_SQL).await?;
    let row = rs.next_row().ok_or(ProbeError::NoRecords)?;
    let value = row
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| ProbeError::NullColumn("read_only".to_string()))?;
    parse_int(&String::from_utf8_lossy(&value))
}

pub(crate) fn parse_int(value: &str) -> Result<i64, ProbeError> {
    value.parse::<i64>().map_err(|source| ProbeError::ParseInt {
        value: value.to_string(),
        source,
    })
}
