use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use lab_relay::{config::GlobalConfig, AppError};

fn sample_toml() -> &'static str {
    r#"
[controller]
bind_addr = "127.0.0.1"
port = 7000
heartbeat_interval_seconds = 3
write_timeout_seconds = 2
max_agents = 12
ipc_name = "lab-relay-test"

[agent]
controller = "192.168.1.10"
port = 7000
reconnect_delay_seconds = 7
probe_timeout_ms = 250
max_line_bytes = 4096
local_addr = "192.168.1.37"
screenshot_dir = "/var/tmp/shots"
close_apps = ["firefox", "code"]
"#
}

fn expect_config_error(raw: &str, needle: &str) {
    match GlobalConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => assert!(msg.contains(needle), "expected '{needle}' in: {msg}"),
        other => panic!("expected Err(AppError::Config), got: {other:?}"),
    }
}

#[test]
fn empty_document_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config.controller.bind_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    assert_eq!(config.controller.port, 9999);
    assert_eq!(config.controller.heartbeat_interval(), Duration::from_secs(10));
    assert_eq!(config.controller.write_timeout(), Duration::from_secs(5));
    assert_eq!(config.controller.max_agents, 50);
    assert_eq!(config.controller.ipc_name, "lab-relay");

    assert_eq!(config.agent.controller, None);
    assert_eq!(config.agent.port, 9999);
    assert_eq!(config.agent.reconnect_delay(), Duration::from_secs(5));
    assert_eq!(config.agent.probe_timeout(), Duration::from_millis(100));
    assert_eq!(config.agent.max_line_bytes, 64 * 1024);
    assert_eq!(config.agent.local_addr, None);
    assert_eq!(
        config.agent.close_apps,
        vec!["firefox", "chromium", "libreoffice", "gedit", "nautilus"]
    );
    assert_eq!(config, GlobalConfig::default());
}

#[test]
fn full_document_parses() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("valid config");

    assert_eq!(config.controller.bind_addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(config.controller.port, 7000);
    assert_eq!(config.controller.heartbeat_interval(), Duration::from_secs(3));
    assert_eq!(config.controller.max_agents, 12);
    assert_eq!(config.controller.ipc_name, "lab-relay-test");

    assert_eq!(
        config.agent.controller,
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))
    );
    assert_eq!(config.agent.reconnect_delay(), Duration::from_secs(7));
    assert_eq!(config.agent.probe_timeout(), Duration::from_millis(250));
    assert_eq!(config.agent.max_line_bytes, 4096);
    assert_eq!(config.agent.local_addr, Some(Ipv4Addr::new(192, 168, 1, 37)));
    assert_eq!(config.agent.screenshot_dir, PathBuf::from("/var/tmp/shots"));
    assert_eq!(config.agent.close_apps, vec!["firefox", "code"]);
}

#[test]
fn partial_table_keeps_other_defaults() {
    let config =
        GlobalConfig::from_toml_str("[agent]\ncontroller = \"10.0.0.5\"\n").expect("valid config");

    assert_eq!(
        config.agent.controller,
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
    );
    assert_eq!(config.agent.port, 9999);
    assert_eq!(config.controller.max_agents, 50);
}

#[test]
fn unknown_field_is_rejected() {
    expect_config_error("[controller]\nbogus = 1\n", "invalid config");
}

#[test]
fn malformed_toml_is_rejected() {
    expect_config_error("[controller\nport = ", "invalid config");
}

#[test]
fn invalid_controller_address_is_rejected() {
    expect_config_error("[agent]\ncontroller = \"not-an-ip\"\n", "invalid config");
}

#[test]
fn zero_max_agents_is_rejected() {
    expect_config_error(
        "[controller]\nmax_agents = 0\n",
        "controller.max_agents must be greater than zero",
    );
}

#[test]
fn zero_heartbeat_interval_is_rejected() {
    expect_config_error(
        "[controller]\nheartbeat_interval_seconds = 0\n",
        "controller.heartbeat_interval_seconds",
    );
}

#[test]
fn blank_ipc_name_is_rejected() {
    expect_config_error(
        "[controller]\nipc_name = \"  \"\n",
        "controller.ipc_name must not be empty",
    );
}

#[test]
fn zero_agent_port_is_rejected() {
    expect_config_error("[agent]\nport = 0\n", "agent.port must be greater than zero");
}

#[test]
fn tiny_line_limit_is_rejected() {
    expect_config_error(
        "[agent]\nmax_line_bytes = 100\n",
        "agent.max_line_bytes must be at least 256",
    );
}

#[test]
fn validate_catches_overrides_applied_after_load() {
    let mut config = GlobalConfig::from_toml_str("").expect("valid config");
    config.agent.port = 0;

    assert!(matches!(config.validate(), Err(AppError::Config(_))));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(sample_toml().as_bytes()).expect("write config");

    let config = GlobalConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.controller.port, 7000);
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");

    match GlobalConfig::load_from_path(&missing) {
        Err(AppError::Config(msg)) => assert!(msg.contains("failed to read config"), "got: {msg}"),
        other => panic!("expected Err(AppError::Config), got: {other:?}"),
    }
}

#[test]
fn load_optional_without_path_is_default() {
    let config = GlobalConfig::load_optional(None).expect("defaults");
    assert_eq!(config, GlobalConfig::default());
}
