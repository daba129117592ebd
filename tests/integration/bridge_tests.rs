//! Integration tests for the agent-facing tool bridge.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use tool_bridge::bridge::{ToolBridge, ToolOutput};
use tool_bridge::explore::{ExploreEvent, ExploreStep};
use tool_bridge::gateway::{FixedWindowRateLimiter, Gateway, MemoryKeyStore, StaticIdentityProvider};

use super::test_helpers::{test_context, DaemonHarness, ScriptedModel, ScriptedProvider};

struct Setup {
    harness: DaemonHarness,
    provider: Arc<ScriptedProvider>,
    bridge: ToolBridge,
}

fn setup(calls_per_window: u32, steps: Vec<tool_bridge::Result<ExploreStep>>) -> Setup {
    let harness = DaemonHarness::start();
    let gateway = Gateway::new(
        Arc::new(
            StaticIdentityProvider::new()
                .with_user("tok-alice", "alice")
                .with_user("tok-bob", "bob"),
        ),
        Arc::new(MemoryKeyStore::new().with_key("alice", "gw-alice")),
        Arc::new(FixedWindowRateLimiter::new(
            calls_per_window,
            Duration::from_secs(60),
        )),
    );
    let provider = ScriptedProvider::new(ScriptedModel::new(steps));
    let bridge = ToolBridge::new(
        harness.dispatcher.clone(),
        gateway,
        Arc::clone(&provider) as Arc<dyn tool_bridge::explore::ModelProvider>,
        &harness.config,
    );
    Setup {
        harness,
        provider,
        bridge,
    }
}

#[tokio::test]
async fn admitted_call_returns_a_value() {
    let s = setup(10, Vec::new());

    let output = s
        .bridge
        .invoke("tok-alice", "list_dir", json!({}), &test_context())
        .await
        .expect("invoke");

    assert_eq!(
        output.into_value(),
        Some(json!({ "entries": ["Cargo.toml", "src"] }))
    );
}

/// Rejected callers never reach the daemon.
#[tokio::test]
async fn invalid_credential_is_rejected_before_dispatch() {
    let s = setup(10, Vec::new());

    let err = s
        .bridge
        .invoke("tok-mallory", "list_dir", json!({}), &test_context())
        .await
        .expect_err("unauthorized");

    assert_eq!(err.kind(), "unauthorized");
    assert!(s.harness.executor.calls().is_empty());
}

#[tokio::test]
async fn rate_limited_caller_is_rejected_before_dispatch() {
    let s = setup(1, Vec::new());

    s.bridge
        .invoke("tok-alice", "list_dir", json!({}), &test_context())
        .await
        .expect("first call admitted");
    let err = s
        .bridge
        .invoke("tok-alice", "list_dir", json!({}), &test_context())
        .await
        .expect_err("limited");

    assert_eq!(err.kind(), "rate_limited");
    assert_eq!(s.harness.executor.calls().len(), 1);
}

/// `explore` opens a model with the caller's gateway key and streams.
#[tokio::test]
async fn explore_returns_a_stream() {
    let s = setup(
        10,
        vec![Ok(ExploreStep::Finish {
            summary: "found it".into(),
        })],
    );

    let output = s
        .bridge
        .invoke(
            "tok-alice",
            "explore",
            json!({ "task": "find the entry point" }),
            &test_context(),
        )
        .await
        .expect("invoke");
    let ToolOutput::Stream(stream) = output else {
        panic!("explore must stream");
    };

    let events = tokio::time::timeout(Duration::from_secs(3), stream.collect_events())
        .await
        .expect("stream finishes");
    assert_eq!(
        events.last(),
        Some(&ExploreEvent::Finished {
            summary: "found it".into(),
            steps: 1
        })
    );
    assert_eq!(s.provider.keys(), vec!["gw-alice".to_owned()]);
}

#[tokio::test]
async fn explore_without_gateway_key_fails() {
    let s = setup(10, Vec::new());

    let err = s
        .bridge
        .invoke(
            "tok-bob",
            "explore",
            json!({ "task": "find the entry point" }),
            &test_context(),
        )
        .await
        .expect_err("no key");

    assert_eq!(err.kind(), "missing_gateway_key");
    assert!(s.provider.keys().is_empty());
}

#[tokio::test]
async fn explore_arguments_are_validated() {
    let s = setup(10, Vec::new());

    let err = s
        .bridge
        .invoke("tok-alice", "explore", json!({ "task": "" }), &test_context())
        .await
        .expect_err("empty task");

    assert_eq!(err.kind(), "invalid_arguments");
}

#[tokio::test]
async fn tools_lists_every_descriptor() {
    let s = setup(10, Vec::new());
    let names: Vec<&str> = s.bridge.tools().map(|t| t.name.as_str()).collect();
    assert_eq!(names.len(), 8);
    assert!(names.contains(&"explore"));
}
