#![forbid(unsafe_code)]

//! `lab-relay-agent` — agent binary.
//!
//! Connects to the controller (given explicitly or found by subnet scan),
//! keeps the connection alive across controller restarts, and runs each
//! received command on the local desktop.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use lab_relay::agent::{AgentClient, CommandInterpreter, LifecycleSettings, SystemExecutor};
use lab_relay::telemetry::{init_tracing, shutdown_signal, LogFormat};
use lab_relay::{AppError, GlobalConfig, Result};

#[derive(Debug, Parser)]
#[command(name = "lab-relay-agent", about = "Lab command relay agent", version, long_about = None)]
struct Cli {
    /// Controller address; the local /24 is scanned when omitted.
    controller: Option<IpAddr>,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override `agent.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Print a systemd user unit that starts this agent at login, then exit.
    #[arg(long)]
    print_systemd_unit: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    if args.print_systemd_unit {
        print!("{}", systemd_unit(&args)?);
        return Ok(());
    }

    init_tracing(args.log_format)?;
    info!("lab-relay agent bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_optional(args.config.as_deref())?;
    if let Some(controller) = args.controller {
        config.agent.controller = Some(controller);
    }
    if let Some(port) = args.port {
        config.agent.port = port;
    }
    config.validate()?;
    let config = config.agent;
    info!(
        controller = ?config.controller,
        port = config.port,
        "configuration loaded"
    );

    // ── Start the connection loop ───────────────────────
    let executor = Arc::new(SystemExecutor::new(&config));
    let interpreter = CommandInterpreter::new(executor);
    let handle = AgentClient::new(LifecycleSettings::from(&config), interpreter).spawn();

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    handle.stop().await;
    info!("lab-relay-agent shut down");

    Ok(())
}

/// Render a systemd user unit that runs this executable with the same
/// controller and config arguments.
fn systemd_unit(args: &Cli) -> Result<String> {
    let exe = std::env::current_exe()
        .map_err(|err| AppError::Config(format!("cannot locate agent executable: {err}")))?;

    let mut exec_start = exe.to_string_lossy().into_owned();
    if let Some(ref config) = args.config {
        let config = config
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid config path: {err}")))?;
        exec_start.push_str(&format!(" --config {}", config.to_string_lossy()));
    }
    if let Some(port) = args.port {
        exec_start.push_str(&format!(" --port {port}"));
    }
    if let Some(controller) = args.controller {
        exec_start.push_str(&format!(" {controller}"));
    }

    Ok(format!(
        "[Unit]\n\
         Description=Lab Relay agent\n\
         After=graphical-session.target network-online.target\n\
         \n\
         [Service]\n\
         ExecStart={exec_start}\n\
         Restart=always\n\
         RestartSec=5\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n"
    ))
}
