//! Controller side: accept agents, keep them alive, broadcast commands.
//!
//! - `registry`: the live connection map and its change events.
//! - `heartbeat`: per-connection ping loop; the only failure detector.
//! - `broadcast`: fan-out of one encoded command to a registry snapshot.
//! - `server`: TCP accept loop wiring the three together.

pub mod broadcast;
pub mod heartbeat;
pub mod registry;
pub mod server;

pub use broadcast::{BroadcastDispatcher, BroadcastReport};
pub use registry::{AgentConnection, AgentSummary, ConnectionRegistry, RegistryEvent};
pub use server::Controller;
