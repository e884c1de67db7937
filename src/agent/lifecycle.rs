//! Agent connection lifecycle.
//!
//! ```text
//! Idle ─▶ Connecting ─▶ Connected ─▶ Disconnected ─┐
//!             ▲                                     │ fixed backoff
//!             └─────────────────────────────────────┘
//!                      any state ─▶ Stopped (on stop)
//! ```
//!
//! The backoff is constant with no jitter, so agents reconnecting to a
//! restarted controller arrive together.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::discovery::{self, DiscoverySettings};
use crate::agent::interpreter::CommandInterpreter;
use crate::agent::reader::{run_reader, SessionEnd};
use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Upper bound on opening the controller stream once an address is known.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the agent is in its connect/reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, not yet started.
    Idle,
    /// Resolving the controller address or opening the stream.
    Connecting,
    /// Stream open; commands are being read.
    Connected,
    /// Stream closed or never opened; waiting out the backoff.
    Disconnected,
    /// Stopped for good.
    Stopped,
}

/// Runtime parameters for [`AgentClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Explicit controller host; discovery is used when `None`.
    pub controller: Option<IpAddr>,
    /// Controller port.
    pub port: u16,
    /// Fixed wait between a disconnect and the next attempt.
    pub reconnect_delay: Duration,
    /// Line limit for the stream decoder.
    pub max_line_bytes: usize,
    /// Subnet scan parameters.
    pub discovery: DiscoverySettings,
}

impl From<&AgentConfig> for LifecycleSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            controller: config.controller,
            port: config.port,
            reconnect_delay: config.reconnect_delay(),
            max_line_bytes: config.max_line_bytes,
            discovery: DiscoverySettings {
                port: config.port,
                probe_timeout: config.probe_timeout(),
                local_addr: config.local_addr,
            },
        }
    }
}

/// The agent's connect / read / reconnect loop.
#[derive(Debug)]
pub struct AgentClient {
    settings: LifecycleSettings,
    interpreter: CommandInterpreter,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    discovered: Option<SocketAddr>,
}

/// Control handle for a spawned [`AgentClient`].
#[derive(Debug)]
pub struct AgentHandle {
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    join: JoinHandle<()>,
}

impl AgentHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Request a stop without waiting for it.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the agent and wait until its loop has exited.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            warn!(%err, "agent loop ended abnormally");
        }
    }
}

impl AgentClient {
    /// Create an idle client.
    #[must_use]
    pub fn new(settings: LifecycleSettings, interpreter: CommandInterpreter) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            settings,
            interpreter,
            state,
            cancel: CancellationToken::new(),
            discovered: None,
        }
    }

    /// Start the loop on a new task.
    #[must_use]
    pub fn spawn(self) -> AgentHandle {
        let cancel = self.cancel.clone();
        let state = self.state.subscribe();
        let join = tokio::spawn(self.run().instrument(info_span!("agent")));
        AgentHandle {
            cancel,
            state,
            join,
        }
    }

    /// Run until stopped.
    pub async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.transition(ConnectionState::Connecting);
            match self.connect().await {
                Ok(stream) => {
                    self.transition(ConnectionState::Connected);
                    let interpreter = &self.interpreter;
                    let end = run_reader(
                        stream,
                        self.settings.max_line_bytes,
                        &self.cancel,
                        |command| {
                            interpreter.dispatch(command);
                        },
                    )
                    .await;

                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::StreamClosed => info!("connection to controller lost"),
                        SessionEnd::Failed(err) => warn!(%err, "session ended with error"),
                    }
                }
                Err(err) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    warn!(%err, "could not connect to controller");
                }
            }

            self.transition(ConnectionState::Disconnected);
            info!(delay = ?self.settings.reconnect_delay, "reconnecting after backoff");
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }

        self.transition(ConnectionState::Stopped);
        info!("agent stopped");
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "state change");
        }
    }

    /// Resolve the controller and open a stream to it.
    async fn connect(&mut self) -> Result<TcpStream> {
        let (addr, discovered) = self.resolve().await?;

        let attempt = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr));
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                return Err(AppError::Transport("connect cancelled".into()));
            }
            outcome = attempt => outcome,
        };

        let failure = match outcome {
            Ok(Ok(stream)) => {
                info!(controller = %addr, "connected to controller");
                return Ok(stream);
            }
            Ok(Err(err)) => format!("connect to {addr} failed: {err}"),
            Err(_) => format!("connect to {addr} timed out"),
        };

        if discovered {
            // Scan again next time; the controller may have moved.
            self.discovered = None;
        }
        Err(AppError::Transport(failure))
    }

    /// Controller address and whether it came from discovery.
    async fn resolve(&mut self) -> Result<(SocketAddr, bool)> {
        if let Some(host) = self.settings.controller {
            return Ok((SocketAddr::new(host, self.settings.port), false));
        }
        if let Some(addr) = self.discovered {
            return Ok((addr, true));
        }

        match discovery::discover(&self.settings.discovery, &self.cancel).await? {
            Some(addr) => {
                self.discovered = Some(addr);
                Ok((addr, true))
            }
            None => Err(AppError::Discovery(
                "no controller found; set agent.controller to connect directly".into(),
            )),
        }
    }
}
