//! TCP accept loop and the running [`Controller`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ControllerConfig;
use crate::controller::broadcast::{BroadcastDispatcher, BroadcastReport};
use crate::controller::heartbeat::{spawn_heartbeat, HeartbeatSettings};
use crate::controller::registry::{AgentConnection, ConnectionRegistry};
use crate::protocol::Command;
use crate::{AppError, Result};

/// Read buffer for draining bytes agents send back.
const DRAIN_BUFFER_BYTES: usize = 1024;

/// A running controller: listener, registry, heartbeats and dispatcher.
#[derive(Debug)]
pub struct Controller {
    registry: ConnectionRegistry,
    dispatcher: BroadcastDispatcher,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_handle: JoinHandle<()>,
}

impl Controller {
    /// Bind the configured address and start accepting agents.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the listener cannot be bound.
    pub async fn start(config: &ControllerConfig) -> Result<Self> {
        let bind = SocketAddr::new(config.bind_addr, config.port);
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|err| AppError::Transport(format!("failed to bind {bind}: {err}")))?;
        Self::from_listener(listener, config)
    }

    /// Start accepting agents on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the listener's address is unavailable.
    pub fn from_listener(listener: TcpListener, config: &ControllerConfig) -> Result<Self> {
        let local_addr = listener
            .local_addr()
            .map_err(|err| AppError::Transport(format!("listener has no local address: {err}")))?;

        let registry = ConnectionRegistry::new();
        let dispatcher = BroadcastDispatcher::new(registry.clone(), config.write_timeout());
        let cancel = CancellationToken::new();
        let settings = AcceptSettings {
            heartbeat: HeartbeatSettings {
                interval: config.heartbeat_interval(),
                write_timeout: config.write_timeout(),
            },
            max_agents: config.max_agents,
        };

        let span = info_span!("controller", addr = %local_addr);
        let accept_handle = tokio::spawn(
            accept_loop(listener, registry.clone(), settings, cancel.clone()).instrument(span),
        );
        info!(addr = %local_addr, "controller listening");

        Ok(Self {
            registry,
            dispatcher,
            local_addr,
            cancel,
            accept_handle,
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Dispatcher bound to this controller's registry.
    #[must_use]
    pub fn dispatcher(&self) -> &BroadcastDispatcher {
        &self.dispatcher
    }

    /// Send `command` to every connected agent.
    ///
    /// # Errors
    ///
    /// See [`BroadcastDispatcher::broadcast`].
    pub async fn broadcast(&self, command: &Command) -> Result<BroadcastReport> {
        self.dispatcher.broadcast(command).await
    }

    /// Close the listener and every registered connection.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.accept_handle.await {
            warn!(%err, "accept loop ended abnormally");
        }
        self.registry.shutdown().await;
        info!("controller stopped");
    }
}

#[derive(Debug, Clone, Copy)]
struct AcceptSettings {
    heartbeat: HeartbeatSettings,
    max_agents: usize,
}

async fn accept_loop(
    listener: TcpListener,
    registry: ConnectionRegistry,
    settings: AcceptSettings,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                info!("accept loop shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => register_agent(stream, addr, &registry, settings).await,
                    Err(err) => warn!(%err, "accept failed"),
                }
            }
        }
    }
}

async fn register_agent(
    stream: TcpStream,
    addr: SocketAddr,
    registry: &ConnectionRegistry,
    settings: AcceptSettings,
) {
    if registry.len().await >= settings.max_agents && !registry.contains(addr).await {
        warn!(
            peer = %addr,
            max_agents = settings.max_agents,
            "agent limit reached, refusing connection"
        );
        return;
    }

    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %addr, %err, "failed to set TCP_NODELAY");
    }

    let (read_half, write_half) = stream.into_split();
    let conn = Arc::new(AgentConnection::new(addr, write_half));
    registry.add(Arc::clone(&conn)).await;

    let _heartbeat = spawn_heartbeat(registry.clone(), Arc::clone(&conn), settings.heartbeat);
    tokio::spawn(
        drain_inbound(read_half, conn).instrument(info_span!("agent_reader", peer = %addr)),
    );
}

/// Discard anything the agent writes until the connection closes.
///
/// The protocol is one-way; this only keeps the socket's receive buffer
/// from filling. Liveness is judged by heartbeat writes, not by reads.
async fn drain_inbound(mut read_half: OwnedReadHalf, conn: Arc<AgentConnection>) {
    let mut buf = [0u8; DRAIN_BUFFER_BYTES];
    loop {
        tokio::select! {
            () = conn.closed() => break,
            read = read_half.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("agent closed its side of the stream");
                    break;
                }
                Ok(n) => debug!(bytes = n, "ignoring inbound bytes from agent"),
                Err(err) => {
                    debug!(%err, "agent read failed");
                    break;
                }
            },
        }
    }
}
