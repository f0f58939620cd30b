//! Master health check
//!
//! A node is a healthy master if:
//! 1. @@global.read_only is 0 (any positive value means read only)
//! 2. SHOW SLAVE STATUS returns no rows
//!
//! Rules are evaluated in that order and the first violation is reported.

use tracing::debug;

use super::{read_only_flag, ProbeContext, ProbeError, SLAVE_STATUS_SQL};

/// Why a node is not a healthy master
#[derive(Debug, Clone, thiserror::Error)]
pub enum MasterError {
    #[error("DB is read only")]
    ReadOnly,
    #[error("Master has slave configuration")]
    IsSlave,
    /// Fallback used when the check answers `false` without a reason
    #[error("Not a master")]
    NotMaster,
    #[error(transparent)]
    Raw(#[from] ProbeError),
}

/// Check whether the probed instance is a writable, non-replicating master
pub async fn is_master(ctx: &ProbeContext) -> Result<bool, MasterError> {
    let read_only = read_only_flag(ctx.db()).await?;
    if read_only > 0 {
        debug!(read_only, "Instance is read only, not a master");
        return Err(MasterError::ReadOnly);
    }

    // Any replica configuration disqualifies, running or not
    let status = ctx
        .db()
        .query(SLAVE_STATUS_SQL)
        .await
        .map_err(ProbeError::from)?;
    if !status.is_empty() {
        debug!("Instance has slave status, not a master");
        return Err(MasterError::IsSlave);
    }

    debug!("Instance is read_only=0 and no slave status, healthy master");
    Ok(true)
}
