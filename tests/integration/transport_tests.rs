//! Integration tests for channel teardown and backpressure.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

use tool_bridge::dispatch::Dispatcher;
use tool_bridge::tools::ToolRegistry;
use tool_bridge::transport::Channel;
use tool_bridge::{BridgeConfig, Result};

use super::test_helpers::{raw_harness, test_config, test_context};

async fn wait_for_pending(dispatcher: &Dispatcher, expected: usize) {
    let correlator = dispatcher.channel().correlator();
    for _ in 0..100 {
        if correlator.pending_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pending count never reached {expected}");
}

/// Closing the channel with 3 calls outstanding fails all 3 with a
/// transport error and leaves nothing pending.
#[tokio::test]
async fn closing_fails_every_outstanding_call() {
    let config = test_config();
    let (dispatcher, mut daemon) = raw_harness(&config);

    let mut calls = Vec::new();
    for pattern in ["a", "b", "c"] {
        let d = dispatcher.clone();
        calls.push(tokio::spawn(async move {
            d.dispatch("grep", json!({ "pattern": pattern }), &test_context())
                .await
        }));
        daemon.next_call().await;
    }
    wait_for_pending(&dispatcher, 3).await;

    dispatcher.channel().close().await;

    for call in calls {
        let err = call.await.expect("task").expect_err("transport failure");
        assert_eq!(err.kind(), "transport_error");
    }
    assert_eq!(dispatcher.channel().correlator().pending_count().await, 0);
    assert!(dispatcher.channel().is_closed());
}

/// The daemon going away mid-call is a transport error too.
#[tokio::test]
async fn daemon_disconnect_fails_pending_calls() {
    let config = test_config();
    let (dispatcher, mut daemon) = raw_harness(&config);

    let call = tokio::spawn({
        let d = dispatcher.clone();
        async move { d.dispatch("list_dir", json!({}), &test_context()).await }
    });
    daemon.next_call().await;
    drop(daemon);

    let err = call.await.expect("task").expect_err("disconnected");
    assert_eq!(err.kind(), "transport_error");
    assert_eq!(dispatcher.channel().correlator().pending_count().await, 0);
}

#[tokio::test]
async fn calls_after_close_fail_fast() {
    let config = test_config();
    let (dispatcher, _daemon) = raw_harness(&config);
    dispatcher.channel().close().await;

    let err = dispatcher
        .dispatch("list_dir", json!({}), &test_context())
        .await
        .expect_err("closed");
    assert_eq!(err.kind(), "transport_error");
}

/// Past the pending-call cap new calls fail with `overloaded` instead of
/// queueing.
#[tokio::test]
async fn pending_cap_rejects_new_calls() {
    let config = BridgeConfig::from_toml_str(
        "sweep_interval_ms = 50\n[limits]\nmax_pending_calls = 1\n[timeouts]\ndefault_seconds = 1\nmax_seconds = 5\nbash_seconds = 1\n",
    )
    .expect("config");
    let (agent, daemon_side) = tokio::io::duplex(1 << 16);
    let (reader, writer) = tokio::io::split(agent);
    let channel = Arc::new(Channel::spawn("cap", reader, writer, &config));
    let dispatcher = Dispatcher::new(
        channel,
        Arc::new(ToolRegistry::builtin(&config.timeouts)),
        &config,
    );

    let first = tokio::spawn({
        let d = dispatcher.clone();
        async move { d.dispatch("list_dir", json!({}), &test_context()).await }
    });
    wait_for_pending(&dispatcher, 1).await;

    let err = dispatcher
        .dispatch("list_dir", json!({}), &test_context())
        .await
        .expect_err("over cap");
    assert_eq!(err.kind(), "overloaded");

    drop(daemon_side);
    assert!(first.await.expect("task").is_err());
}

// ── Stalled daemon ───────────────────────────────────────────

/// Channel over a tiny pipe with a one-frame outbound queue. The returned
/// daemon end is kept open and never read, so the writer blocks on the
/// first frame and the queue fills behind it.
fn stalled_harness(default_seconds: u64) -> (Dispatcher, DuplexStream) {
    let config = BridgeConfig::from_toml_str(&format!(
        "sweep_interval_ms = 50\n[limits]\noutbound_queue = 1\n[timeouts]\ndefault_seconds = {default_seconds}\nmax_seconds = 60\nbash_seconds = 1\n"
    ))
    .expect("config");
    let (agent, daemon_side) = tokio::io::duplex(64);
    let (reader, writer) = tokio::io::split(agent);
    let channel = Arc::new(Channel::spawn("stalled", reader, writer, &config));
    let dispatcher = Dispatcher::new(
        channel,
        Arc::new(ToolRegistry::builtin(&config.timeouts)),
        &config,
    );
    (dispatcher, daemon_side)
}

fn spawn_reads(dispatcher: &Dispatcher, count: usize) -> Vec<JoinHandle<Result<serde_json::Value>>> {
    (0..count)
        .map(|i| {
            let d = dispatcher.clone();
            tokio::spawn(async move {
                d.dispatch(
                    "read_file",
                    json!({ "path": format!("src/module_{i}.rs") }),
                    &test_context(),
                )
                .await
            })
        })
        .collect()
}

/// Callers stuck behind a full outbound queue still honour their deadline.
#[tokio::test]
async fn full_outbound_queue_respects_call_deadline() {
    let (dispatcher, _daemon_side) = stalled_harness(1);

    let calls = spawn_reads(&dispatcher, 4);

    for call in calls {
        let err = tokio::time::timeout(Duration::from_secs(3), call)
            .await
            .expect("caller must not outlive its deadline")
            .expect("task")
            .expect_err("timeout");
        assert_eq!(err.kind(), "timeout");
    }
    assert_eq!(dispatcher.channel().correlator().pending_count().await, 0);
}

/// Closing the channel releases callers blocked on queue space and the
/// writer blocked on the stalled stream.
#[tokio::test]
async fn close_releases_callers_blocked_on_a_stalled_daemon() {
    let (dispatcher, _daemon_side) = stalled_harness(30);

    let calls = spawn_reads(&dispatcher, 4);
    tokio::time::sleep(Duration::from_millis(200)).await;

    dispatcher.channel().close().await;

    for call in calls {
        let err = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .expect("close must release the caller")
            .expect("task")
            .expect_err("transport failure");
        assert_eq!(err.kind(), "transport_error");
    }
    assert_eq!(dispatcher.channel().correlator().pending_count().await, 0);
}

/// A stalled daemon blocks callers through the dispatcher scope too.
#[tokio::test]
async fn scope_cancel_releases_callers_blocked_on_queue_space() {
    let (dispatcher, _daemon_side) = stalled_harness(30);

    let calls = spawn_reads(&dispatcher, 4);
    tokio::time::sleep(Duration::from_millis(200)).await;

    dispatcher.cancel_token().cancel();

    for call in calls {
        let err = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .expect("scope cancel must release the caller")
            .expect("task")
            .expect_err("cancelled");
        assert_eq!(err.kind(), "cancelled");
    }
}
