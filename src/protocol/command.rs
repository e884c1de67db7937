//! Command envelope exchanged between controller and agents.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Closed set of actions an agent understands.
///
/// Unrecognised wire values deserialize into [`Action::Unknown`] rather than
/// failing, so a newer controller never breaks an older agent's connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Liveness probe; carries no payload and triggers nothing.
    Ping,
    /// Power the machine off.
    Shutdown,
    /// Reboot the machine.
    Restart,
    /// Lock the interactive session.
    Lock,
    /// Launch the application named in `app`.
    OpenApp,
    /// Terminate the configured set of user applications.
    CloseApps,
    /// Minimise every window.
    ShowDesktop,
    /// Capture the screen.
    Screenshot,
    /// Display `content` to the user.
    Message,
    /// Run `command` through the shell.
    ExecuteCommand,
    /// Any action this build does not know about.
    Unknown(String),
}

impl Action {
    /// Every action this build can act on, in wire order.
    pub const KNOWN: [Action; 10] = [
        Action::Ping,
        Action::Shutdown,
        Action::Restart,
        Action::Lock,
        Action::OpenApp,
        Action::CloseApps,
        Action::ShowDesktop,
        Action::Screenshot,
        Action::Message,
        Action::ExecuteCommand,
    ];

    /// Wire tag for this action.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Shutdown => "shutdown",
            Self::Restart => "restart",
            Self::Lock => "lock",
            Self::OpenApp => "open_app",
            Self::CloseApps => "close_apps",
            Self::ShowDesktop => "show_desktop",
            Self::Screenshot => "screenshot",
            Self::Message => "message",
            Self::ExecuteCommand => "execute_command",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for Action {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "ping" => Self::Ping,
            "shutdown" => Self::Shutdown,
            "restart" => Self::Restart,
            "lock" => Self::Lock,
            "open_app" => Self::OpenApp,
            "close_apps" => Self::CloseApps,
            "show_desktop" => Self::ShowDesktop,
            "screenshot" => Self::Screenshot,
            "message" => Self::Message,
            "execute_command" => Self::ExecuteCommand,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Unknown(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message: an action plus its optional payload fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// What the agent should do.
    pub action: Action,
    /// Application identifier for [`Action::OpenApp`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    /// Text for [`Action::Message`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Shell command line for [`Action::ExecuteCommand`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Command {
    /// A payload-free command.
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            action,
            app: None,
            content: None,
            command: None,
        }
    }

    /// The heartbeat probe.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(Action::Ping)
    }

    /// Launch `app` on every agent.
    #[must_use]
    pub fn open_app(app: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
            ..Self::new(Action::OpenApp)
        }
    }

    /// Show `content` to every user.
    #[must_use]
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new(Action::Message)
        }
    }

    /// Run `command` through the shell on every agent.
    #[must_use]
    pub fn execute(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::new(Action::ExecuteCommand)
        }
    }

    /// Check that the action is known and its required payload is present.
    ///
    /// Used on the controller before anything is put on the wire; agents
    /// stay lenient and apply their own fallbacks.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] naming the offending action or field.
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str, value: Option<&String>| {
            if value.is_some_and(|v| !v.trim().is_empty()) {
                Ok(())
            } else {
                Err(AppError::Protocol(format!(
                    "action `{}` requires a non-empty `{field}`",
                    self.action
                )))
            }
        };

        match &self.action {
            Action::OpenApp => missing("app", self.app.as_ref()),
            Action::Message => missing("content", self.content.as_ref()),
            Action::ExecuteCommand => missing("command", self.command.as_ref()),
            Action::Unknown(tag) => Err(AppError::Protocol(format!("unknown action `{tag}`"))),
            _ => Ok(()),
        }
    }
}
