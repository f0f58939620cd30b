//! Slave health check
//!
//! A node is a healthy slave if, in this order:
//! 1. @@global.read_only is exactly 1
//! 2. SHOW SLAVE STATUS has a row (no row is reported as `No records`)
//! 3. Slave_IO_Running is "Yes"
//! 4. Slave_SQL_Running is "Yes"
//! 5. Seconds_Behind_Master is an integer no greater than the lag threshold

use tracing::debug;

use super::decoder::decode_row;
use super::{parse_int, read_only_flag, ProbeContext, ProbeError, SLAVE_STATUS_SQL};

const IO_RUNNING: &str = "Slave_IO_Running";
const SQL_RUNNING: &str = "Slave_SQL_Running";
const SECONDS_BEHIND: &str = "Seconds_Behind_Master";

/// Why a node is not a healthy slave
#[derive(Debug, Clone, thiserror::Error)]
pub enum SlaveError {
    #[error("Slave is writeable")]
    NotReadOnly,
    #[error("IO Slave not running")]
    IoNotRunning,
    #[error("SQL Slave not running")]
    SqlNotRunning,
    #[error("Slave is lagging")]
    Lagging,
    /// Fallback used when the check answers `false` without a reason
    #[error("Not a slave")]
    NotSlave,
    #[error(transparent)]
    Raw(#[from] ProbeError),
}

/// Check whether the probed instance is a read-only, in-sync replica
pub async fn is_slave(ctx: &ProbeContext) -> Result<bool, SlaveError> {
    let read_only = read_only_flag(ctx.db()).await?;
    if read_only != 1 {
        debug!(read_only, "Instance is writeable, not a slave");
        return Err(SlaveError::NotReadOnly);
    }

    let mut status = ctx
        .db()
        .query(SLAVE_STATUS_SQL)
        .await
        .map_err(ProbeError::from)?;
    // Zero rows surfaces as NoRecords, not as a classification
    let row = decode_row(&mut status)?;

    if !row.is(IO_RUNNING, "Yes") {
        debug!(io_running = ?row.get(IO_RUNNING), "Replication IO thread not running");
        return Err(SlaveError::IoNotRunning);
    }

    if !row.is(SQL_RUNNING, "Yes") {
        debug!(sql_running = ?row.get(SQL_RUNNING), "Replication SQL thread not running");
        return Err(SlaveError::SqlNotRunning);
    }

    let seconds_behind = row
        .get(SECONDS_BEHIND)
        .ok_or_else(|| ProbeError::NullColumn(SECONDS_BEHIND.to_string()))?;
    let lag = parse_int(seconds_behind)?;

    if lag > ctx.slave_lag() {
        debug!(lag, threshold = ctx.slave_lag(), "Slave is lagging");
        return Err(SlaveError::Lagging);
    }

    debug!(lag, "Instance is a healthy slave");
    Ok(true)
}
