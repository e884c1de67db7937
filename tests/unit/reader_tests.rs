//! Unit tests for the agent read loop.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use lab_relay::agent::reader::{run_reader, SessionEnd};
use lab_relay::protocol::{Action, Command};
use lab_relay::AppError;

const LIMIT: usize = 64 * 1024;
const WAIT: Duration = Duration::from_secs(2);

/// Write `bytes` into a pipe, close it, and collect what the reader yields.
async fn read_all(bytes: &[u8], max_line_bytes: usize) -> (Vec<Command>, SessionEnd) {
    let (mut controller, agent) = tokio::io::duplex(LIMIT * 2);
    controller.write_all(bytes).await.expect("write");
    drop(controller);

    let cancel = CancellationToken::new();
    let mut received = Vec::new();
    let end = tokio::time::timeout(
        WAIT,
        run_reader(agent, max_line_bytes, &cancel, |command| received.push(command)),
    )
    .await
    .expect("reader must finish");
    (received, end)
}

#[tokio::test]
async fn commands_are_delivered_in_order_until_close() {
    let (received, end) = read_all(
        b"{\"action\":\"lock\"}\n{\"action\":\"message\",\"content\":\"hi\"}\n",
        LIMIT,
    )
    .await;

    assert_eq!(
        received,
        vec![Command::new(Action::Lock), Command::message("hi")]
    );
    assert!(matches!(end, SessionEnd::StreamClosed), "got: {end:?}");
}

#[tokio::test]
async fn malformed_line_does_not_end_session() {
    let (received, end) = read_all(
        b"{\"action\":\"lock\"}\ngarbage\n{\"action\":\"screenshot\"}\n",
        LIMIT,
    )
    .await;

    assert_eq!(
        received,
        vec![Command::new(Action::Lock), Command::new(Action::Screenshot)]
    );
    assert!(matches!(end, SessionEnd::StreamClosed), "got: {end:?}");
}

#[tokio::test]
async fn trailing_fragment_is_dropped_at_close() {
    let (received, end) = read_all(b"{\"action\":\"lock\"}\n{\"action\":\"shut", LIMIT).await;

    assert_eq!(received, vec![Command::new(Action::Lock)]);
    assert!(matches!(end, SessionEnd::StreamClosed), "got: {end:?}");
}

#[tokio::test]
async fn oversized_line_ends_session_with_error() {
    let mut bytes = b"{\"action\":\"lock\"}\n".to_vec();
    bytes.extend_from_slice(&[b'a'; 1024]);
    bytes.push(b'\n');

    let (received, end) = read_all(&bytes, 256).await;

    assert_eq!(received, vec![Command::new(Action::Lock)]);
    match end {
        SessionEnd::Failed(AppError::Protocol(msg)) => {
            assert!(msg.contains("line too long"), "got: {msg}");
        }
        other => panic!("expected SessionEnd::Failed, got: {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_ends_idle_session() {
    let (_controller, agent) = tokio::io::duplex(1024);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let end = tokio::time::timeout(WAIT, run_reader(agent, LIMIT, &cancel, |_| {}))
        .await
        .expect("reader must stop when cancelled");

    assert!(matches!(end, SessionEnd::Cancelled), "got: {end:?}");
}
