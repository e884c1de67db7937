//! Per-connection liveness monitor.
//!
//! Every registered connection gets one monitor task. The task writes a
//! `ping` frame, then sleeps for the heartbeat interval, and repeats. A write
//! that fails or times out means the agent is gone: the monitor removes its
//! own connection from the registry and exits. Nothing else reaps monitors;
//! they also stop when the connection is closed or the registry shuts down.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::controller::registry::{AgentConnection, ConnectionRegistry};
use crate::protocol::codec::encode_line;
use crate::protocol::Command;
use crate::Result;

/// Wire form of the liveness probe.
///
/// # Errors
///
/// Returns [`crate::AppError::Protocol`] if the ping cannot be encoded.
pub fn ping_frame() -> Result<Bytes> {
    encode_line(&Command::ping())
}

/// Timing for a heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Sleep between pings.
    pub interval: Duration,
    /// Upper bound on a single ping write.
    pub write_timeout: Duration,
}

/// Spawn the liveness loop for `conn`.
#[must_use]
pub fn spawn_heartbeat(
    registry: ConnectionRegistry,
    conn: Arc<AgentConnection>,
    settings: HeartbeatSettings,
) -> JoinHandle<()> {
    let span = info_span!("heartbeat", peer = %conn.addr());
    tokio::spawn(run_heartbeat(registry, conn, settings).instrument(span))
}

/// Liveness loop body; runs until the peer dies or the connection closes.
pub async fn run_heartbeat(
    registry: ConnectionRegistry,
    conn: Arc<AgentConnection>,
    settings: HeartbeatSettings,
) {
    let ping = match ping_frame() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%err, "cannot encode ping, heartbeat not started");
            return;
        }
    };

    loop {
        if let Err(err) = conn.send(&ping, settings.write_timeout).await {
            if conn.is_closed() || registry.is_shutdown() {
                debug!("connection closed, heartbeat stopping");
            } else {
                info!(%err, "heartbeat failed, removing agent");
                registry.remove_connection(&conn).await;
            }
            break;
        }
        conn.mark_liveness_check();

        tokio::select! {
            () = conn.closed() => {
                debug!("connection closed, heartbeat stopping");
                break;
            }
            () = registry.shutdown_token().cancelled() => {
                debug!("registry shut down, heartbeat stopping");
                break;
            }
            () = tokio::time::sleep(settings.interval) => {}
        }
    }
}
