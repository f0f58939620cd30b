//! HTTP exposition of the health checks
//!
//! Each role gets its own router with a single fallback handler, so any
//! method on any path runs the check. 200 with an empty body means
//! healthy; everything else is a 502 carrying the failure message.

mod shutdown;

pub use shutdown::shutdown_signal;

use std::fmt;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::health::{is_master, is_slave, MasterError, ProbeContext, SlaveError};

/// Which check a listener answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => f.write_str("master"),
            Role::Slave => f.write_str("slave"),
        }
    }
}

/// Build the router for one role
pub fn router(role: Role, ctx: Arc<ProbeContext>) -> Router {
    let router = match role {
        Role::Master => Router::new().fallback(check_master),
        Role::Slave => Router::new().fallback(check_slave),
    };
    router.layer(TraceLayer::new_for_http()).with_state(ctx)
}

/// Bind a check listener
pub async fn bind(role: Role, addr: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(role = %role, addr = %listener.local_addr()?, "Check listener bound");
    Ok(listener)
}

/// Serve one role until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    role: Role,
    ctx: Arc<ProbeContext>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(role, ctx))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!(role = %role, "Check listener stopped");
    Ok(())
}

async fn check_master(State(ctx): State<Arc<ProbeContext>>) -> Response {
    match is_master(&ctx).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => unhealthy(Role::Master, MasterError::NotMaster, false),
        Err(err) => {
            let raw = matches!(err, MasterError::Raw(_));
            unhealthy(Role::Master, err, raw)
        }
    }
}

async fn check_slave(State(ctx): State<Arc<ProbeContext>>) -> Response {
    match is_slave(&ctx).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => unhealthy(Role::Slave, SlaveError::NotSlave, false),
        Err(err) => {
            let raw = matches!(err, SlaveError::Raw(_));
            unhealthy(Role::Slave, err, raw)
        }
    }
}

fn unhealthy(role: Role, reason: impl fmt::Display, raw: bool) -> Response {
    let message = reason.to_string();
    if raw {
        warn!(role = %role, error = %message, "Health check could not complete");
    } else {
        debug!(role = %role, reason = %message, "Health check failed");
    }

    (
        StatusCode::BAD_GATEWAY,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message,
    )
        .into_response()
}
