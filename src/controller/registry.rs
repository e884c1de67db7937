//! Registry of live agent connections.
//!
//! The registry is the only shared mutable state on the controller. Every
//! operation takes the same async mutex, so a broadcast never iterates a map
//! that a disconnect is mutating; readers receive a copy via
//! [`ConnectionRegistry::snapshot_all`]. Mutations publish a
//! [`RegistryEvent`] on a broadcast channel for display. Publishing never
//! waits for subscribers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Capacity of the registry event channel before slow subscribers lag.
const EVENT_CAPACITY: usize = 64;

/// Sentinel for "never checked" in [`AgentConnection::last_check_millis`].
const NEVER: i64 = i64::MIN;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Point-in-time copy of the registry.
pub type RegistrySnapshot = HashMap<SocketAddr, Arc<AgentConnection>>;

/// One accepted agent, identified by its peer address.
///
/// Holds the write side of the stream. Heartbeats and broadcasts serialize
/// their writes through the writer mutex, so frames never interleave.
pub struct AgentConnection {
    addr: SocketAddr,
    writer: Mutex<BoxedWriter>,
    connected_at: DateTime<Utc>,
    last_check_millis: AtomicI64,
    closed: CancellationToken,
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("addr", &self.addr)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl AgentConnection {
    /// Wrap the write side of a freshly accepted stream.
    pub fn new<W>(addr: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            addr,
            writer: Mutex::new(Box::new(writer)),
            connected_at: Utc::now(),
            last_check_millis: AtomicI64::new(NEVER),
            closed: CancellationToken::new(),
        }
    }

    /// Peer address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// When the connection was accepted.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// When the last successful liveness ping was written.
    #[must_use]
    pub fn last_liveness_check_at(&self) -> Option<DateTime<Utc>> {
        match self.last_check_millis.load(Ordering::Acquire) {
            NEVER => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    pub(crate) fn mark_liveness_check(&self) {
        self.last_check_millis
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Completes once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Write one pre-encoded frame, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the connection is closed, the write
    /// fails (broken pipe, reset) or does not finish within `timeout`.
    pub async fn send(&self, frame: &[u8], timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::Transport(format!(
                "connection to {} is closed",
                self.addr
            )));
        }

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AppError::Transport(format!(
                "write to {} failed: {err}",
                self.addr
            ))),
            Err(_) => Err(AppError::Transport(format!(
                "write to {} timed out after {timeout:?}",
                self.addr
            ))),
        }
    }

    /// Close the connection: stop its tasks and shut down the write side.
    ///
    /// If a write is in flight the shutdown is skipped; the socket is
    /// released once the last task holding the connection exits.
    pub async fn close(&self) {
        self.closed.cancel();
        if let Ok(mut writer) = self.writer.try_lock() {
            if let Err(err) = writer.shutdown().await {
                debug!(peer = %self.addr, %err, "shutdown of agent stream failed");
            }
        }
    }

    /// Display view of this connection.
    #[must_use]
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            address: self.addr,
            connected_at: self.connected_at,
            last_liveness_check_at: self.last_liveness_check_at(),
        }
    }
}

/// Serializable view of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Peer address.
    pub address: SocketAddr,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
    /// Last successful liveness ping, if any.
    pub last_liveness_check_at: Option<DateTime<Utc>>,
}

/// Registry change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A new agent was registered.
    Connected {
        /// Peer address.
        addr: SocketAddr,
    },
    /// An agent reconnected from an address that was already registered.
    Replaced {
        /// Peer address.
        addr: SocketAddr,
    },
    /// An agent was removed.
    Disconnected {
        /// Peer address.
        addr: SocketAddr,
    },
}

/// Mutually exclusive map of peer address to [`AgentConnection`].
///
/// Cheap to clone; clones share the same map, channel and shutdown state.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    entries: Arc<Mutex<HashMap<SocketAddr, Arc<AgentConnection>>>>,
    events: broadcast::Sender<RegistryEvent>,
    shutdown: CancellationToken,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe to registry change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Insert `conn`, replacing and closing any entry for the same address.
    ///
    /// After [`shutdown`](Self::shutdown) the connection is closed instead.
    pub async fn add(&self, conn: Arc<AgentConnection>) {
        let addr = conn.addr();
        let previous = {
            let mut entries = self.entries.lock().await;
            if self.is_shutdown() {
                drop(entries);
                warn!(peer = %addr, "registry is shut down, refusing agent");
                conn.close().await;
                return;
            }
            entries.insert(addr, conn)
        };

        if let Some(previous) = previous {
            previous.close().await;
            self.publish(RegistryEvent::Replaced { addr });
        } else {
            self.publish(RegistryEvent::Connected { addr });
        }
    }

    /// Remove and close the entry for `addr`. No-op when absent.
    pub async fn remove(&self, addr: SocketAddr) -> Option<Arc<AgentConnection>> {
        let removed = self.entries.lock().await.remove(&addr);
        if let Some(ref conn) = removed {
            conn.close().await;
            self.publish(RegistryEvent::Disconnected { addr });
        }
        removed
    }

    /// Remove `conn` only if it is still the registered entry for its address.
    ///
    /// Returns `true` when an entry was removed. A monitor holding a
    /// connection that has since been replaced leaves the replacement alone.
    pub async fn remove_connection(&self, conn: &Arc<AgentConnection>) -> bool {
        let addr = conn.addr();
        let removed = {
            let mut entries = self.entries.lock().await;
            match entries.get(&addr) {
                Some(current) if Arc::ptr_eq(current, conn) => entries.remove(&addr),
                _ => None,
            }
        };

        conn.close().await;
        if removed.is_some() {
            self.publish(RegistryEvent::Disconnected { addr });
            true
        } else {
            false
        }
    }

    /// Immutable copy of every entry.
    pub async fn snapshot_all(&self) -> RegistrySnapshot {
        self.entries.lock().await.clone()
    }

    /// Display views of every entry, sorted by address.
    pub async fn summaries(&self) -> Vec<AgentSummary> {
        let mut summaries: Vec<AgentSummary> = self
            .entries
            .lock()
            .await
            .values()
            .map(|conn| conn.summary())
            .collect();
        summaries.sort_by_key(|s| s.address);
        summaries
    }

    /// Whether `addr` is registered.
    pub async fn contains(&self, addr: SocketAddr) -> bool {
        self.entries.lock().await.contains_key(&addr)
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no agent is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Close every connection and refuse further additions.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<AgentConnection>> = {
            let mut entries = self.entries.lock().await;
            self.shutdown.cancel();
            entries.drain().map(|(_, conn)| conn).collect()
        };

        for conn in &drained {
            conn.close().await;
            self.publish(RegistryEvent::Disconnected { addr: conn.addr() });
        }
        info!(closed = drained.len(), "connection registry shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when the registry shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine; lagging subscribers drop old events.
        let _ = self.events.send(event);
    }
}

/// Log registry changes until the registry shuts down.
///
/// This is the console view of the registry: each change is reported along
/// with the current number of connected agents.
#[must_use]
pub fn spawn_registry_logger(registry: ConnectionRegistry) -> JoinHandle<()> {
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = registry.shutdown_token().cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) => {
                    let agents = registry.len().await;
                    match event {
                        RegistryEvent::Connected { addr } => {
                            info!(peer = %addr, agents, "agent connected");
                        }
                        RegistryEvent::Replaced { addr } => {
                            info!(peer = %addr, agents, "agent reconnected, previous entry replaced");
                        }
                        RegistryEvent::Disconnected { addr } => {
                            info!(peer = %addr, agents, "agent disconnected");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "registry logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
