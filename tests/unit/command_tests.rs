//! Unit tests for the command envelope and action tags.

use lab_relay::protocol::{Action, Command};
use lab_relay::AppError;

fn assert_protocol_error(result: lab_relay::Result<()>, needle: &str) {
    match result {
        Err(AppError::Protocol(msg)) => {
            assert!(msg.contains(needle), "expected '{needle}' in: {msg}");
        }
        other => panic!("expected Err(AppError::Protocol), got: {other:?}"),
    }
}

// ── Action tags ─────────────────────────────────────────────────────────────

#[test]
fn known_tags_map_back_to_their_action() {
    for action in Action::KNOWN {
        let tag = action.as_str().to_owned();
        assert_eq!(Action::from(tag.clone()), action, "tag {tag}");
        assert_eq!(action.to_string(), tag);
    }
}

#[test]
fn wire_tags_are_snake_case() {
    assert_eq!(Action::OpenApp.as_str(), "open_app");
    assert_eq!(Action::CloseApps.as_str(), "close_apps");
    assert_eq!(Action::ShowDesktop.as_str(), "show_desktop");
    assert_eq!(Action::ExecuteCommand.as_str(), "execute_command");
}

#[test]
fn unknown_tag_is_preserved() {
    let action = Action::from("teleport".to_owned());
    assert_eq!(action, Action::Unknown("teleport".into()));
    assert_eq!(String::from(action), "teleport");
}

// ── Serialization ───────────────────────────────────────────────────────────

#[test]
fn payload_fields_serialize_only_when_present() {
    let json = serde_json::to_value(Command::open_app("gedit")).expect("serialize");
    assert_eq!(json, serde_json::json!({ "action": "open_app", "app": "gedit" }));
}

#[test]
fn extra_fields_are_ignored_on_decode() {
    let command: Command =
        serde_json::from_str(r#"{"action":"lock","sender":"admin","priority":3}"#)
            .expect("extra fields must not fail decoding");
    assert_eq!(command, Command::new(Action::Lock));
}

#[test]
fn missing_action_fails_decode() {
    let result = serde_json::from_str::<Command>(r#"{"content":"hello"}"#);
    assert!(result.is_err(), "action is required");
}

// ── Validation ──────────────────────────────────────────────────────────────

#[test]
fn payload_free_actions_validate() {
    for action in [
        Action::Ping,
        Action::Shutdown,
        Action::Restart,
        Action::Lock,
        Action::CloseApps,
        Action::ShowDesktop,
        Action::Screenshot,
    ] {
        Command::new(action.clone())
            .validate()
            .unwrap_or_else(|err| panic!("{action} must validate: {err}"));
    }
}

#[test]
fn open_app_requires_app() {
    assert_protocol_error(
        Command::new(Action::OpenApp).validate(),
        "action `open_app` requires a non-empty `app`",
    );
    assert_protocol_error(Command::open_app("   ").validate(), "`app`");
    Command::open_app("firefox").validate().expect("valid");
}

#[test]
fn message_requires_content() {
    assert_protocol_error(Command::new(Action::Message).validate(), "`content`");
    Command::message("hello").validate().expect("valid");
}

#[test]
fn execute_command_requires_command() {
    assert_protocol_error(
        Command::new(Action::ExecuteCommand).validate(),
        "requires a non-empty `command`",
    );
    Command::execute("uptime").validate().expect("valid");
}

#[test]
fn unknown_action_fails_validation() {
    assert_protocol_error(
        Command::new(Action::Unknown("teleport".into())).validate(),
        "unknown action `teleport`",
    );
}
