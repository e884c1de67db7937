//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or local I/O operation failure.
    Io(String),
    /// Wire protocol failure: malformed record, oversized line, bad payload.
    Protocol(String),
    /// Network transport failure: refused, reset, broken pipe, timeout.
    Transport(String),
    /// Controller discovery could not run or found nothing.
    Discovery(String),
    /// IPC communication failure.
    Ipc(String),
    /// The command executor failed to carry out an action.
    Executor(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Discovery(msg) => write!(f, "discovery: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Executor(msg) => write!(f, "executor: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}
