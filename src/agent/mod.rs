//! Agent side: find the controller, stay connected, act on commands.
//!
//! - `discovery`: /24 scan used when no controller address is configured.
//! - `lifecycle`: connect / read / backoff state machine.
//! - `reader`: per-session read loop over the line codec.
//! - `interpreter`: maps commands to executor calls on detached tasks.
//! - `executor`: the OS-facing capability and its Linux implementation.

pub mod discovery;
pub mod executor;
pub mod interpreter;
pub mod lifecycle;
pub mod reader;

pub use executor::{Executor, SystemExecutor};
pub use interpreter::CommandInterpreter;
pub use lifecycle::{AgentClient, AgentHandle, ConnectionState, LifecycleSettings};
