//! End-to-end broadcast over loopback TCP.
//!
//! Three agents connect, the operator broadcasts a message, and each agent
//! runs it exactly once. An agent that connects afterwards sees nothing of
//! the earlier broadcast.

use lab_relay::agent::ConnectionState;
use lab_relay::protocol::Command;

use super::test_helpers::{
    assert_no_call, connect_agent, next_call, start_controller, wait_for_agents, wait_for_state,
};

#[tokio::test]
async fn message_reaches_every_connected_agent_once() {
    let controller = start_controller().await;
    let addr = controller.local_addr();

    let mut agents = Vec::new();
    for _ in 0..3 {
        let (handle, calls) = connect_agent(addr);
        wait_for_state(&handle, ConnectionState::Connected).await;
        agents.push((handle, calls));
    }
    wait_for_agents(controller.registry(), 3).await;

    let report = controller
        .broadcast(&Command::message("Class ends in 5 minutes"))
        .await
        .expect("broadcast");
    assert_eq!(report.delivered.len(), 3);
    assert!(report.failed.is_empty());

    for (_, calls) in &mut agents {
        assert_eq!(next_call(calls).await, "message:Class ends in 5 minutes");
    }

    // A late joiner gets no replay.
    let (late, mut late_calls) = connect_agent(addr);
    wait_for_state(&late, ConnectionState::Connected).await;
    wait_for_agents(controller.registry(), 4).await;
    assert_no_call(&mut late_calls).await;

    for (_, calls) in &mut agents {
        assert_no_call(calls).await;
    }

    late.stop().await;
    for (handle, _) in agents {
        handle.stop().await;
    }
    controller.stop().await;
}

#[tokio::test]
async fn successive_broadcasts_each_run_once() {
    let controller = start_controller().await;
    let (handle, mut calls) = connect_agent(controller.local_addr());
    wait_for_state(&handle, ConnectionState::Connected).await;
    wait_for_agents(controller.registry(), 1).await;

    for command in [
        Command::open_app("firefox"),
        Command::execute("echo one"),
        Command::message("two"),
    ] {
        controller.broadcast(&command).await.expect("broadcast");
    }

    // Execution is detached per command, so completion order is not fixed.
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(next_call(&mut calls).await);
    }
    seen.sort();
    assert_eq!(seen, vec!["message:two", "open:firefox", "shell:echo one"]);
    assert_no_call(&mut calls).await;

    handle.stop().await;
    controller.stop().await;
}

#[tokio::test]
async fn broadcast_with_no_agents_is_empty_report() {
    let controller = start_controller().await;

    let report = controller
        .broadcast(&Command::message("anyone?"))
        .await
        .expect("broadcast");

    assert!(report.delivered.is_empty() && report.failed.is_empty());
    controller.stop().await;
}
