//! Unit tests for `ConnectionRegistry` and `AgentConnection`.
//!
//! Validates:
//! - add / replace / remove semantics keyed by peer address
//! - stale monitors cannot evict a replacement connection
//! - snapshots are independent of later mutations
//! - shutdown closes everything and refuses late arrivals
//! - bounded writes report closed, broken and stalled peers

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::broadcast::error::TryRecvError;

use lab_relay::controller::{ConnectionRegistry, RegistryEvent};
use lab_relay::AppError;

use super::support::{dead_agent, live_agent, peer, read_line, stalled_agent};

const TIMEOUT: Duration = Duration::from_secs(1);

// ── Registration ────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_registers_and_announces() {
    let registry = ConnectionRegistry::new();
    let mut events = registry.subscribe();
    let (conn, _agent) = live_agent(1);

    registry.add(conn).await;

    assert!(registry.contains(peer(1)).await);
    assert_eq!(registry.len().await, 1);
    assert!(!registry.is_empty().await);
    assert_eq!(
        events.try_recv().expect("event"),
        RegistryEvent::Connected { addr: peer(1) }
    );
}

#[tokio::test]
async fn add_same_address_replaces_and_closes_previous() {
    let registry = ConnectionRegistry::new();
    let mut events = registry.subscribe();
    let (first, mut first_agent) = live_agent(1);
    let (second, _second_agent) = live_agent(1);

    registry.add(Arc::clone(&first)).await;
    registry.add(Arc::clone(&second)).await;

    assert_eq!(registry.len().await, 1);
    assert!(first.is_closed(), "replaced connection must be closed");
    assert!(!second.is_closed());

    let snapshot = registry.snapshot_all().await;
    assert!(Arc::ptr_eq(&snapshot[&peer(1)], &second));

    let mut buf = [0u8; 1];
    let n = first_agent.read(&mut buf).await.expect("read");
    assert_eq!(n, 0, "replaced agent must see end-of-stream");

    assert_eq!(
        events.try_recv().expect("event"),
        RegistryEvent::Connected { addr: peer(1) }
    );
    assert_eq!(
        events.try_recv().expect("event"),
        RegistryEvent::Replaced { addr: peer(1) }
    );
}

#[tokio::test]
async fn remove_closes_and_announces() {
    let registry = ConnectionRegistry::new();
    let (conn, _agent) = live_agent(1);
    registry.add(Arc::clone(&conn)).await;
    let mut events = registry.subscribe();

    let removed = registry.remove(peer(1)).await.expect("entry removed");

    assert!(Arc::ptr_eq(&removed, &conn));
    assert!(conn.is_closed());
    assert!(registry.is_empty().await);
    assert_eq!(
        events.try_recv().expect("event"),
        RegistryEvent::Disconnected { addr: peer(1) }
    );
}

#[tokio::test]
async fn remove_absent_is_noop() {
    let registry = ConnectionRegistry::new();
    let mut events = registry.subscribe();

    assert!(registry.remove(peer(9)).await.is_none());
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn stale_connection_cannot_evict_replacement() {
    let registry = ConnectionRegistry::new();
    let (stale, _stale_agent) = live_agent(1);
    let (current, _current_agent) = live_agent(1);
    registry.add(Arc::clone(&stale)).await;
    registry.add(Arc::clone(&current)).await;

    assert!(!registry.remove_connection(&stale).await);
    assert!(registry.contains(peer(1)).await, "replacement must survive");

    assert!(registry.remove_connection(&current).await);
    assert!(registry.is_empty().await);
}

// ── Views ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_is_independent_of_later_changes() {
    let registry = ConnectionRegistry::new();
    let (a, _a) = live_agent(1);
    let (b, _b) = live_agent(2);
    registry.add(a).await;
    registry.add(b).await;

    let snapshot = registry.snapshot_all().await;
    registry.remove(peer(1)).await;

    assert_eq!(snapshot.len(), 2);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn summaries_are_sorted_and_unchecked() {
    let registry = ConnectionRegistry::new();
    let mut agents = Vec::new();
    for n in [3, 1, 2] {
        let (conn, agent) = live_agent(n);
        agents.push(agent);
        registry.add(conn).await;
    }

    let summaries = registry.summaries().await;

    let addrs: Vec<_> = summaries.iter().map(|s| s.address).collect();
    assert_eq!(addrs, vec![peer(1), peer(2), peer(3)]);
    assert!(summaries.iter().all(|s| s.last_liveness_check_at.is_none()));
}

// ── Shutdown ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_closes_all_and_refuses_new_agents() {
    let registry = ConnectionRegistry::new();
    let (a, _a) = live_agent(1);
    let (b, _b) = live_agent(2);
    registry.add(Arc::clone(&a)).await;
    registry.add(Arc::clone(&b)).await;

    registry.shutdown().await;

    assert!(registry.is_shutdown());
    assert!(registry.is_empty().await);
    assert!(a.is_closed() && b.is_closed());

    let (late, _late_agent) = live_agent(3);
    registry.add(Arc::clone(&late)).await;
    assert!(registry.is_empty().await, "late agent must be refused");
    assert!(late.is_closed());
}

// ── Writes ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn send_writes_frame() {
    let (conn, mut agent) = live_agent(1);

    conn.send(b"{\"action\":\"lock\"}\n", TIMEOUT)
        .await
        .expect("send");

    assert_eq!(read_line(&mut agent).await, "{\"action\":\"lock\"}\n");
}

#[tokio::test]
async fn send_after_close_fails() {
    let (conn, _agent) = live_agent(1);
    conn.close().await;

    match conn.send(b"x\n", TIMEOUT).await {
        Err(AppError::Transport(msg)) => assert!(msg.contains("is closed"), "got: {msg}"),
        other => panic!("expected Err(AppError::Transport), got: {other:?}"),
    }
}

#[tokio::test]
async fn send_to_dead_peer_fails() {
    let conn = dead_agent(1);

    match conn.send(b"x\n", TIMEOUT).await {
        Err(AppError::Transport(msg)) => assert!(msg.contains("failed"), "got: {msg}"),
        other => panic!("expected Err(AppError::Transport), got: {other:?}"),
    }
}

#[tokio::test]
async fn send_to_stalled_peer_times_out() {
    let (conn, _agent) = stalled_agent(1, 8);
    let frame = vec![b'x'; 64];

    match conn.send(&frame, Duration::from_millis(50)).await {
        Err(AppError::Transport(msg)) => assert!(msg.contains("timed out"), "got: {msg}"),
        other => panic!("expected Err(AppError::Transport), got: {other:?}"),
    }
}
