//! Fan-out of one command to every registered agent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::controller::registry::{AgentConnection, ConnectionRegistry};
use crate::protocol::{encode_line, Command};
use crate::Result;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    /// Agents the frame was written to, sorted.
    pub delivered: Vec<SocketAddr>,
    /// Agents whose write failed and that were removed, sorted.
    pub failed: Vec<SocketAddr>,
}

/// Serializes commands and writes them to every agent in a registry snapshot.
///
/// Delivery is best-effort and at-most-once. Writes run concurrently, so a
/// slow or failing peer never delays the others; failed peers are removed
/// from the registry only after the whole fan-out has finished.
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    registry: ConnectionRegistry,
    write_timeout: Duration,
}

impl BroadcastDispatcher {
    /// Create a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: ConnectionRegistry, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    /// The registry this dispatcher fans out to.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Send `command` to every agent registered right now.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`](crate::AppError::Protocol) only if the
    /// command cannot be encoded; per-agent write failures are reported in
    /// [`BroadcastReport::failed`].
    pub async fn broadcast(&self, command: &Command) -> Result<BroadcastReport> {
        let frame = encode_line(command)?;
        let span = info_span!("broadcast", action = %command.action);

        async move {
            let snapshot = self.registry.snapshot_all().await;
            if snapshot.is_empty() {
                info!("no agents connected, nothing sent");
                return Ok(BroadcastReport::default());
            }

            let writes = snapshot.into_values().map(|conn| {
                let frame = &frame;
                async move {
                    let outcome = conn.send(frame, self.write_timeout).await;
                    (conn, outcome)
                }
            });

            let mut report = BroadcastReport::default();
            let mut dead: Vec<Arc<AgentConnection>> = Vec::new();
            for (conn, outcome) in join_all(writes).await {
                match outcome {
                    Ok(()) => report.delivered.push(conn.addr()),
                    Err(err) => {
                        warn!(peer = %conn.addr(), %err, "broadcast write failed");
                        report.failed.push(conn.addr());
                        dead.push(conn);
                    }
                }
            }

            for conn in &dead {
                self.registry.remove_connection(conn).await;
            }

            report.delivered.sort_unstable();
            report.failed.sort_unstable();
            info!(
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "broadcast complete"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
