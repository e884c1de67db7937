#![forbid(unsafe_code)]

//! `lab-relay-ctl` — operator CLI for a running `lab-relay` controller.
//!
//! Connects to the controller's IPC socket, sends one JSON request, and
//! prints the response.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "lab-relay-ctl",
    about = "Operator CLI for the lab-relay controller",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the controller's `ipc_name` config).
    #[arg(long, default_value = "lab-relay")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List connected agents.
    List,

    /// Power off every agent machine.
    Shutdown,

    /// Reboot every agent machine.
    Restart,

    /// Lock every agent screen.
    Lock,

    /// Launch an application on every agent.
    OpenApp {
        /// Executable name, e.g. `firefox`.
        app: String,
    },

    /// Close the usual user applications on every agent.
    CloseApps,

    /// Minimise all windows on every agent.
    ShowDesktop,

    /// Take a screenshot on every agent.
    Screenshot,

    /// Show a notification on every agent.
    Message {
        /// Text to display.
        text: String,
    },

    /// Run a shell command on every agent.
    Exec {
        /// Command line passed to `sh -c`.
        command_line: String,
    },
}

impl Command {
    /// JSON request understood by the controller's IPC server.
    fn to_request(&self) -> serde_json::Value {
        let broadcast = |action: &str| serde_json::json!({ "command": "broadcast", "action": action });

        match self {
            Self::List => serde_json::json!({ "command": "list" }),
            Self::Shutdown => broadcast("shutdown"),
            Self::Restart => broadcast("restart"),
            Self::Lock => broadcast("lock"),
            Self::OpenApp { app } => {
                let mut req = broadcast("open_app");
                req["app"] = serde_json::Value::String(app.clone());
                req
            }
            Self::CloseApps => broadcast("close_apps"),
            Self::ShowDesktop => broadcast("show_desktop"),
            Self::Screenshot => broadcast("screenshot"),
            Self::Message { text } => {
                let mut req = broadcast("message");
                req["content"] = serde_json::Value::String(text.clone());
                req
            }
            Self::Exec { command_line } => {
                let mut req = broadcast("execute_command");
                req["command_line"] = serde_json::Value::String(command_line.clone());
                req
            }
        }
    }
}

fn main() {
    let args = Cli::parse();
    let request_json = args.command.to_request();

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    if let Some(data) = obj.get("data") {
                        println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
                    } else {
                        println!("OK");
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to controller: {err}");
            eprintln!("Is lab-relay running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Connect to the IPC socket, send a JSON request, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
