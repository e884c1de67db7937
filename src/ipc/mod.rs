//! Local IPC layer for `lab-relay-ctl` interaction.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that accepts JSON-line requests from the companion CLI and turns
//! them into registry queries and broadcasts.

pub mod server;

pub use server::{spawn_ipc_server, IpcRequest, IpcResponse};
