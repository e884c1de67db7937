//! Maps decoded commands onto [`Executor`] operations.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::agent::executor::{ExecFuture, Executor};
use crate::protocol::{Action, Command};

/// Text shown when a `message` command arrives without content.
pub const DEFAULT_MESSAGE: &str = "Message from administrator";

/// Dispatches commands to an executor without blocking the read loop.
///
/// Every executor call runs on its own detached task. Failures are logged
/// there and never reach the caller, so one bad command cannot disturb the
/// connection or the commands after it.
#[derive(Clone)]
pub struct CommandInterpreter {
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for CommandInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandInterpreter").finish_non_exhaustive()
    }
}

impl CommandInterpreter {
    /// Wrap `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Act on `command`.
    ///
    /// Returns the handle of the detached task, or `None` when there was
    /// nothing to run (ping, unknown action, missing payload).
    pub fn dispatch(&self, command: Command) -> Option<JoinHandle<()>> {
        let action = command.action.clone();
        debug!(%action, "command received");

        let job = prepare(command)?;

        let executor = Arc::clone(&self.executor);
        let span = tracing::info_span!("execute", %action);
        Some(tokio::spawn(
            async move {
                if let Err(err) = job.run(executor.as_ref()).await {
                    warn!(%err, "command execution failed");
                }
            }
            .instrument(span),
        ))
    }
}

/// Resolve `command` to an executor call, or `None` when there is nothing to run.
fn prepare(command: Command) -> Option<Job> {
    let job = match command.action {
        Action::Ping => return None,
        Action::Shutdown => Job::Shutdown,
        Action::Restart => Job::Restart,
        Action::Lock => Job::Lock,
        Action::CloseApps => Job::CloseApps,
        Action::ShowDesktop => Job::ShowDesktop,
        Action::Screenshot => Job::Screenshot,
        Action::OpenApp => match non_empty(command.app) {
            Some(app) => Job::OpenApp(app),
            None => {
                warn!("open_app without `app`, ignoring");
                return None;
            }
        },
        Action::Message => {
            Job::Message(non_empty(command.content).unwrap_or_else(|| DEFAULT_MESSAGE.into()))
        }
        Action::ExecuteCommand => match non_empty(command.command) {
            Some(line) => Job::Shell(line),
            None => {
                warn!("execute_command without `command`, ignoring");
                return None;
            }
        },
        Action::Unknown(tag) => {
            info!(action = %tag, "unknown action, ignoring");
            return None;
        }
    };
    Some(job)
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.trim().is_empty())
}

/// A command resolved to a concrete executor call.
#[derive(Debug)]
enum Job {
    Shutdown,
    Restart,
    Lock,
    OpenApp(String),
    CloseApps,
    ShowDesktop,
    Screenshot,
    Message(String),
    Shell(String),
}

impl Job {
    fn run(self, executor: &dyn Executor) -> ExecFuture<'_> {
        match self {
            Self::Shutdown => executor.shutdown(),
            Self::Restart => executor.restart(),
            Self::Lock => executor.lock(),
            Self::OpenApp(app) => executor.open_application(&app),
            Self::CloseApps => executor.close_applications(),
            Self::ShowDesktop => executor.show_desktop(),
            Self::Screenshot => executor.screenshot(),
            Self::Message(text) => executor.display_message(&text),
            Self::Shell(line) => executor.run_shell_command(&line),
        }
    }
}
