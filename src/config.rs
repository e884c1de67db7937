//! Global configuration parsing and validation.
//!
//! Both binaries read the same optional TOML file; the controller uses the
//! `[controller]` table and the agent the `[agent]` table. Every field has a
//! default, so an empty document is a valid configuration.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Well-known TCP port the controller listens on.
pub const DEFAULT_PORT: u16 = 9999;

/// Smallest accepted value for [`AgentConfig::max_line_bytes`].
pub const MIN_LINE_BYTES: usize = 256;

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_write_timeout() -> u64 {
    5
}

fn default_max_agents() -> usize {
    50
}

fn default_ipc_name() -> String {
    "lab-relay".into()
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_probe_timeout_ms() -> u64 {
    100
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_screenshot_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_close_apps() -> Vec<String> {
    ["firefox", "chromium", "libreoffice", "gedit", "nautilus"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Controller-side settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ControllerConfig {
    /// Interface address the listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// TCP port agents connect to. `0` binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between liveness pings on each connection.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Seconds a single write may take before the peer is considered dead.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_seconds: u64,
    /// Maximum number of concurrently registered agents.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Named pipe / Unix socket identifier for `lab-relay-ctl`.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            write_timeout_seconds: default_write_timeout(),
            max_agents: default_max_agents(),
            ipc_name: default_ipc_name(),
        }
    }
}

impl ControllerConfig {
    /// Interval between heartbeat pings.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Upper bound on a single socket write.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(AppError::Config(
                "controller.heartbeat_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.write_timeout_seconds == 0 {
            return Err(AppError::Config(
                "controller.write_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.max_agents == 0 {
            return Err(AppError::Config(
                "controller.max_agents must be greater than zero".into(),
            ));
        }
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("controller.ipc_name must not be empty".into()));
        }
        Ok(())
    }
}

/// Agent-side settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct AgentConfig {
    /// Controller host. When absent the agent scans the local subnet.
    #[serde(default)]
    pub controller: Option<IpAddr>,
    /// Controller TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fixed delay between a disconnect and the next connection attempt.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_seconds: u64,
    /// Per-host connect timeout used by discovery.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Longest accepted protocol line before the session is dropped.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Local address whose /24 is scanned, overriding auto-detection.
    #[serde(default)]
    pub local_addr: Option<Ipv4Addr>,
    /// Directory screenshots are written to.
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,
    /// Processes terminated by `close_apps`.
    #[serde(default = "default_close_apps")]
    pub close_apps: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            controller: None,
            port: default_port(),
            reconnect_delay_seconds: default_reconnect_delay(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
            local_addr: None,
            screenshot_dir: default_screenshot_dir(),
            close_apps: default_close_apps(),
        }
    }
}

impl AgentConfig {
    /// Backoff between reconnect attempts.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }

    /// Timeout for one discovery probe.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(AppError::Config("agent.port must be greater than zero".into()));
        }
        if self.reconnect_delay_seconds == 0 {
            return Err(AppError::Config(
                "agent.reconnect_delay_seconds must be greater than zero".into(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(AppError::Config(
                "agent.probe_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_line_bytes < MIN_LINE_BYTES {
            return Err(AppError::Config(format!(
                "agent.max_line_bytes must be at least {MIN_LINE_BYTES}"
            )));
        }
        Ok(())
    }
}

/// Global configuration parsed from `lab-relay.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GlobalConfig {
    /// Controller settings.
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Agent settings.
    #[serde(default)]
    pub agent: AgentConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// Same as [`GlobalConfig::load_from_path`].
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Re-run validation, e.g. after applying command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.controller.validate()?;
        self.agent.validate()
    }
}
