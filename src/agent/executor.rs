//! Executor capability: the OS-level side of each action.
//!
//! The [`Executor`] trait is all the interpreter needs. [`SystemExecutor`]
//! drives a Linux desktop with the usual command-line tools.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use chrono::Local;
use tokio::process::Command as Process;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Boxed future returned by [`Executor`] operations.
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// One operation per protocol action.
///
/// Implementations may block for as long as the action takes; the
/// interpreter runs every call on a detached task.
pub trait Executor: Send + Sync {
    /// Power the machine off.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`] if the action could not be started.
    fn shutdown(&self) -> ExecFuture<'_>;

    /// Reboot the machine.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`] if the action could not be started.
    fn restart(&self) -> ExecFuture<'_>;

    /// Lock the interactive session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`] if no lock mechanism succeeded.
    fn lock(&self) -> ExecFuture<'_>;

    /// Launch `app`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`] if the application could not start.
    fn open_application(&self, app: &str) -> ExecFuture<'_>;

    /// Terminate the usual user applications.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`] if the termination tool is missing.
    fn close_applications(&self) -> ExecFuture<'_>;

    /// Minimise every window.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`] if no window tool succeeded.
    fn show_desktop(&self) -> ExecFuture<'_>;

    /// Capture the screen.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the output directory cannot be created
    /// and [`AppError::Executor`] if the capture tool failed.
    fn screenshot(&self) -> ExecFuture<'_>;

    /// Show `text` to the user.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`] if the notification could not be shown.
    fn display_message(&self, text: &str) -> ExecFuture<'_>;

    /// Run `command` through the shell. The text is trusted as-is.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Executor`] if the shell could not be started.
    fn run_shell_command(&self, command: &str) -> ExecFuture<'_>;
}

/// Timeout for each candidate screen-lock command.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Screen-lock commands tried in order until one succeeds.
const LOCK_COMMANDS: &[&[&str]] = &[
    &["gnome-screensaver-command", "--lock"],
    &["xdg-screensaver", "lock"],
    &["loginctl", "lock-session"],
    &["dm-tool", "lock"],
];

/// xdotool chord for the show-desktop fallback.
const SHOW_DESKTOP_KEYS: &str = "Super+d";

/// Notification title used by [`SystemExecutor::display_message`].
const NOTIFY_TITLE: &str = "Lab Relay";

/// [`Executor`] backed by standard Linux desktop tools.
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    screenshot_dir: PathBuf,
    close_apps: Vec<String>,
}

impl SystemExecutor {
    /// Build from the agent configuration.
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            screenshot_dir: config.screenshot_dir.clone(),
            close_apps: config.close_apps.clone(),
        }
    }
}

/// Run `program` to completion, reporting a non-zero exit as an error.
async fn run(program: &str, args: &[&str]) -> Result<()> {
    let status = Process::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| AppError::Executor(format!("failed to run {program}: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(AppError::Executor(format!("{program} exited with {status}")))
    }
}

/// Start `program` without waiting for it.
fn spawn_detached(program: &str, args: &[&str]) -> Result<()> {
    let mut child = Process::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AppError::Executor(format!("failed to launch {program}: {e}")))?;

    let program = program.to_owned();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => debug!(program = %program, %status, "launched application exited"),
            Err(err) => debug!(program = %program, %err, "lost track of launched application"),
        }
    });
    Ok(())
}

impl Executor for SystemExecutor {
    fn shutdown(&self) -> ExecFuture<'_> {
        Box::pin(async {
            info!("shutting down system");
            run("sudo", &["shutdown", "-h", "now"]).await
        })
    }

    fn restart(&self) -> ExecFuture<'_> {
        Box::pin(async {
            info!("restarting system");
            run("sudo", &["reboot"]).await
        })
    }

    fn lock(&self) -> ExecFuture<'_> {
        Box::pin(async {
            for candidate in LOCK_COMMANDS {
                let (program, args) = (candidate[0], &candidate[1..]);
                match tokio::time::timeout(LOCK_TIMEOUT, run(program, args)).await {
                    Ok(Ok(())) => {
                        info!(program, "screen locked");
                        return Ok(());
                    }
                    Ok(Err(err)) => debug!(%err, "lock command failed, trying next"),
                    Err(_) => debug!(program, "lock command timed out, trying next"),
                }
            }
            Err(AppError::Executor("no screen lock command succeeded".into()))
        })
    }

    fn open_application(&self, app: &str) -> ExecFuture<'_> {
        let app = app.to_owned();
        Box::pin(async move {
            info!(app = %app, "opening application");
            spawn_detached(&app, &[])
        })
    }

    fn close_applications(&self) -> ExecFuture<'_> {
        Box::pin(async {
            info!(apps = ?self.close_apps, "closing user applications");
            for app in &self.close_apps {
                // pkill exits 1 when nothing matched, which is not a failure here.
                if let Err(err) = run("pkill", &["-f", app]).await {
                    debug!(app = %app, %err, "pkill reported no match");
                }
            }
            Ok(())
        })
    }

    fn show_desktop(&self) -> ExecFuture<'_> {
        Box::pin(async {
            info!("showing desktop");
            if let Err(err) = run("wmctrl", &["-k", "on"]).await {
                debug!(%err, "wmctrl unavailable, falling back to xdotool");
                run("xdotool", &["key", SHOW_DESKTOP_KEYS]).await?;
            }
            Ok(())
        })
    }

    fn screenshot(&self) -> ExecFuture<'_> {
        Box::pin(async {
            tokio::fs::create_dir_all(&self.screenshot_dir)
                .await
                .map_err(|e| {
                    AppError::Io(format!(
                        "cannot create {}: {e}",
                        self.screenshot_dir.display()
                    ))
                })?;
            let name = format!("screenshot_{}.png", Local::now().format("%Y%m%d_%H%M%S"));
            let path = self.screenshot_dir.join(name);
            let path_text = path.to_string_lossy().into_owned();
            info!(path = %path_text, "taking screenshot");
            run("gnome-screenshot", &["-f", &path_text]).await
        })
    }

    fn display_message(&self, text: &str) -> ExecFuture<'_> {
        let text = text.to_owned();
        Box::pin(async move {
            info!(message = %text, "displaying message");
            run("notify-send", &[NOTIFY_TITLE, &text]).await
        })
    }

    fn run_shell_command(&self, command: &str) -> ExecFuture<'_> {
        let command = command.to_owned();
        Box::pin(async move {
            info!(command = %command, "executing shell command");
            match run("sh", &["-c", &command]).await {
                Err(err) => {
                    warn!(%err, "shell command failed");
                    Err(err)
                }
                ok => ok,
            }
        })
    }
}
