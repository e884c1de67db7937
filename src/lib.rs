#![forbid(unsafe_code)]

//! `lab-relay` distributes administrative commands from one controller to
//! many lab agents over a single persistent TCP stream per agent.

pub mod agent;
pub mod config;
pub mod controller;
pub mod errors;
pub mod ipc;
pub mod protocol;
pub mod telemetry;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
