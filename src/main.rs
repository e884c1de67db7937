#![forbid(unsafe_code)]

//! `lab-relay` — controller binary.
//!
//! Bootstraps configuration, starts the agent listener with its heartbeats,
//! and the IPC server for `lab-relay-ctl`.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lab_relay::controller::registry::spawn_registry_logger;
use lab_relay::controller::Controller;
use lab_relay::ipc::spawn_ipc_server;
use lab_relay::telemetry::{init_tracing, shutdown_signal, LogFormat};
use lab_relay::{AppError, GlobalConfig, Result};

#[derive(Debug, Parser)]
#[command(name = "lab-relay", about = "Lab command relay controller", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override `controller.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Override `controller.bind_addr`.
    #[arg(long)]
    bind: Option<IpAddr>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("lab-relay controller bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_optional(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.controller.port = port;
    }
    if let Some(bind) = args.bind {
        config.controller.bind_addr = bind;
    }
    config.validate()?;
    let config = config.controller;
    info!("configuration loaded");

    // ── Start listener ──────────────────────────────────
    let controller = Controller::start(&config).await?;
    let logger_handle = spawn_registry_logger(controller.registry().clone());

    // ── Start IPC server ────────────────────────────────
    let ct = CancellationToken::new();
    let ipc_handle =
        match spawn_ipc_server(&config.ipc_name, controller.dispatcher().clone(), ct.clone()) {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(%err, "ipc server unavailable; lab-relay-ctl will not connect");
                None
            }
        };

    info!(addr = %controller.local_addr(), "controller ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    controller.stop().await;
    if let Some(handle) = ipc_handle {
        let _ = handle.await;
    }
    let _ = logger_handle.await;
    info!("lab-relay shut down");

    Ok(())
}
