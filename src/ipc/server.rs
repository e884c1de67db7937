//! Local IPC server for `lab-relay-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Each line from a client is one JSON
//! request; each request gets exactly one JSON response line.
//!
//! ## Protocol
//!
//! Request:
//! ```json
//! {"command": "list"}
//! {"command": "broadcast", "action": "lock"}
//! {"command": "broadcast", "action": "open_app", "app": "firefox"}
//! {"command": "broadcast", "action": "message", "content": "Class ends in 5 minutes"}
//! {"command": "broadcast", "action": "execute_command", "command_line": "uptime"}
//! ```
//!
//! Response:
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "unknown action `fly`"}
//! ```

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::controller::BroadcastDispatcher;
use crate::protocol::{Action, Command};
use crate::{AppError, Result};

/// Inbound IPC request from `lab-relay-ctl`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRequest {
    /// Command verb: `list` or `broadcast`.
    pub command: String,
    /// Action tag for `broadcast`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Application name for `open_app`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Text for `message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Shell line for `execute_command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
}

/// Outbound IPC response to `lab-relay-ctl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: &str,
    dispatcher: BroadcastDispatcher,
    ct: CancellationToken,
) -> Result<JoinHandle<()>> {
    let name = name.to_owned();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let span = info_span!("ipc_server", name = %name);
    let handle = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, dispatcher.clone()));
                            }
                            Err(err) => warn!(%err, "IPC accept failed"),
                        }
                    }
                }
            }
        }
        .instrument(span),
    );

    Ok(handle)
}

/// Serve one IPC client until it disconnects.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    dispatcher: BroadcastDispatcher,
) {
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_request(&request, &dispatcher).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(info_span!("ipc_conn"))
    .await;
}

/// Route one request to its handler.
pub async fn dispatch_request(
    request: &IpcRequest,
    dispatcher: &BroadcastDispatcher,
) -> IpcResponse {
    async {
        match request.command.as_str() {
            "list" => handle_list(dispatcher).await,
            "broadcast" => handle_broadcast(request, dispatcher).await,
            other => IpcResponse::error(format!("unknown command: {other}")),
        }
    }
    .instrument(info_span!("ipc_command", command = %request.command))
    .await
}

/// List connected agents.
async fn handle_list(dispatcher: &BroadcastDispatcher) -> IpcResponse {
    let agents = dispatcher.registry().summaries().await;
    match serde_json::to_value(&agents) {
        Ok(items) => IpcResponse::success(serde_json::json!({ "agents": items })),
        Err(err) => IpcResponse::error(format!("failed to list agents: {err}")),
    }
}

/// Build a command from the request and send it to every agent.
async fn handle_broadcast(request: &IpcRequest, dispatcher: &BroadcastDispatcher) -> IpcResponse {
    let command = match command_from_request(request) {
        Ok(command) => command,
        Err(err) => return IpcResponse::error(err.to_string()),
    };

    match dispatcher.broadcast(&command).await {
        Ok(report) => {
            info!(
                action = %command.action,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "broadcast via IPC"
            );
            match serde_json::to_value(&report) {
                Ok(data) => IpcResponse::success(data),
                Err(err) => IpcResponse::error(format!("failed to encode report: {err}")),
            }
        }
        Err(err) => IpcResponse::error(format!("broadcast failed: {err}")),
    }
}

/// Turn an operator request into a validated [`Command`].
///
/// # Errors
///
/// Returns `AppError::Ipc` if the action is missing or reserved, and
/// `AppError::Protocol` if the command fails validation.
pub fn command_from_request(request: &IpcRequest) -> Result<Command> {
    let Some(ref tag) = request.action else {
        return Err(AppError::Ipc("missing required 'action' field".into()));
    };

    let action = Action::from(tag.clone());
    if action == Action::Ping {
        return Err(AppError::Ipc(
            "ping is reserved for the controller heartbeat".into(),
        ));
    }

    let command = Command {
        action,
        app: request.app.clone(),
        content: request.content.clone(),
        command: request.command_line.clone(),
    };
    command.validate()?;
    Ok(command)
}
