//! Integration tests for the explore sub-agent stream.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tool_bridge::explore::{ExploreBridge, ExploreEvent, ExploreStep, ExploreStream, PlannedCall};
use tool_bridge::tools::schemas::ExploreInput;
use tool_bridge::AppError;

use super::test_helpers::{test_context, DaemonHarness, ScriptedModel};

fn input(task: &str) -> ExploreInput {
    ExploreInput {
        task: task.to_owned(),
        path: None,
    }
}

fn start(harness: &DaemonHarness, model: &std::sync::Arc<ScriptedModel>) -> ExploreStream {
    start_with_abort(harness, model, CancellationToken::new())
}

fn start_with_abort(
    harness: &DaemonHarness,
    model: &std::sync::Arc<ScriptedModel>,
    abort: CancellationToken,
) -> ExploreStream {
    let bridge = ExploreBridge::new(&harness.dispatcher, &harness.config);
    bridge.start(
        input("where is main defined?"),
        test_context(),
        model.clone(),
        abort,
    )
}

async fn next(stream: &mut ExploreStream) -> ExploreEvent {
    tokio::time::timeout(Duration::from_secs(3), stream.next_event())
        .await
        .expect("event must arrive in time")
        .expect("stream must not end before its terminal event")
}

async fn drain(stream: ExploreStream) -> Vec<ExploreEvent> {
    tokio::time::timeout(Duration::from_secs(3), stream.collect_events())
        .await
        .expect("stream must finish in time")
}

fn error_kind(event: &ExploreEvent) -> &str {
    match event {
        ExploreEvent::Error { error } => &error.kind,
        other => panic!("expected error event, got {other:?}"),
    }
}

// ── Normal runs ──────────────────────────────────────────────

/// Narration, a round of concurrent calls, then a summary.
#[tokio::test]
async fn run_streams_progress_and_finishes() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(vec![
        Ok(ExploreStep::Message("checking the crate root".into())),
        Ok(ExploreStep::Calls(vec![
            PlannedCall::new("read_file", json!({ "path": "src/main.rs" })),
            PlannedCall::new("grep", json!({ "pattern": "fn main" })),
        ])),
        Ok(ExploreStep::Finish {
            summary: "main is in src/main.rs".into(),
        }),
    ]);

    let events = drain(start(&harness, &model)).await;

    assert_eq!(events.len(), 7, "events: {events:?}");
    assert_eq!(
        events[0],
        ExploreEvent::Started {
            task: "where is main defined?".into()
        }
    );
    assert_eq!(
        events[1],
        ExploreEvent::Message {
            text: "checking the crate root".into()
        }
    );
    assert!(matches!(&events[2], ExploreEvent::ToolCall { tool, .. } if tool == "read_file"));
    assert!(matches!(&events[3], ExploreEvent::ToolCall { tool, .. } if tool == "grep"));
    assert!(matches!(&events[4], ExploreEvent::ToolResult { outcome } if outcome.is_success()));
    assert!(matches!(&events[5], ExploreEvent::ToolResult { outcome } if outcome.is_success()));
    assert_eq!(
        events[6],
        ExploreEvent::Finished {
            summary: "main is in src/main.rs".into(),
            steps: 3
        }
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    // Task, then the message, then both tool results.
    assert_eq!(model.transcript_lengths(), vec![1, 2, 4]);
    assert_eq!(harness.pending().await, 0);
}

/// Mutating tools are outside the sub-agent's registry.
#[tokio::test]
async fn mutating_tools_are_refused() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(vec![
        Ok(ExploreStep::Calls(vec![
            PlannedCall::new("edit_file", json!({ "path": "a", "old_string": "x", "new_string": "y" })),
            PlannedCall::new("bash", json!({ "command": "rm -rf target" })),
        ])),
        Ok(ExploreStep::Finish {
            summary: "done".into(),
        }),
    ]);

    let events = drain(start(&harness, &model)).await;

    let failures: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ExploreEvent::ToolResult { outcome } => outcome.error().map(|err| err.kind.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec!["unknown_tool", "unknown_tool"]);
    assert!(harness.executor.calls().is_empty());
    assert!(events.last().is_some_and(ExploreEvent::is_terminal));
}

#[tokio::test]
async fn nested_batch_runs_inside_explore() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(vec![
        Ok(ExploreStep::Calls(vec![PlannedCall::new(
            "batch",
            json!({ "calls": [
                { "tool": "list_dir" },
                { "tool": "read_file", "args": { "path": "Cargo.toml" } }
            ] }),
        )])),
        Ok(ExploreStep::Finish {
            summary: "listed".into(),
        }),
    ]);

    let events = drain(start(&harness, &model)).await;

    let result = events
        .iter()
        .find_map(|e| match e {
            ExploreEvent::ToolResult { outcome } => Some(outcome.clone()),
            _ => None,
        })
        .expect("tool result");
    assert!(result.is_success());
    assert_eq!(harness.executor.calls().len(), 2);
}

// ── Terminal errors ──────────────────────────────────────────

#[tokio::test]
async fn step_limit_ends_with_error() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(Vec::new());

    let events = drain(start(&harness, &model)).await;

    let messages = events
        .iter()
        .filter(|e| matches!(e, ExploreEvent::Message { .. }))
        .count();
    assert_eq!(messages, 4);
    assert_eq!(error_kind(events.last().expect("terminal")), "step_limit_exceeded");
}

#[tokio::test]
async fn model_failure_ends_with_error() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(vec![Err(AppError::Remote {
        kind: "model_error".into(),
        message: "upstream unavailable".into(),
    })]);

    let events = drain(start(&harness, &model)).await;

    assert_eq!(events.len(), 2);
    assert_eq!(error_kind(&events[1]), "model_error");
}

// ── Cancellation ─────────────────────────────────────────────

/// Cancelling the stream fails the nested call, stops it on the daemon, and
/// still ends with one terminal `cancelled` event.
#[tokio::test]
async fn cancel_reaches_nested_calls() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(vec![Ok(ExploreStep::Calls(vec![PlannedCall::new(
        "grep",
        json!({ "pattern": "hang" }),
    )]))]);

    let mut stream = start(&harness, &model);
    assert!(matches!(next(&mut stream).await, ExploreEvent::Started { .. }));
    assert!(matches!(next(&mut stream).await, ExploreEvent::ToolCall { .. }));
    tokio::time::sleep(Duration::from_millis(50)).await;

    stream.cancel();

    let rest = drain(stream).await;
    assert!(
        matches!(&rest[0], ExploreEvent::ToolResult { outcome } if outcome.error().is_some_and(|e| e.kind == "cancelled")),
        "events: {rest:?}"
    );
    assert_eq!(error_kind(rest.last().expect("terminal")), "cancelled");
    assert_eq!(rest.iter().filter(|e| e.is_terminal()).count(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.pending().await, 0);
    assert!(harness.executor.calls()[0].cancel.is_cancelled());
}

/// The outer call's abort signal cancels the stream.
#[tokio::test]
async fn outer_abort_cancels_stream() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(vec![Ok(ExploreStep::Calls(vec![PlannedCall::new(
        "grep",
        json!({ "pattern": "hang" }),
    )]))]);
    let abort = CancellationToken::new();

    let mut stream = start_with_abort(&harness, &model, abort.clone());
    assert!(matches!(next(&mut stream).await, ExploreEvent::Started { .. }));
    assert!(matches!(next(&mut stream).await, ExploreEvent::ToolCall { .. }));

    abort.cancel();

    let rest = drain(stream).await;
    assert_eq!(error_kind(rest.last().expect("terminal")), "cancelled");
}

/// Dropping the stream cancels whatever the sub-agent had in flight.
#[tokio::test]
async fn dropping_stream_cancels_nested_calls() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(vec![Ok(ExploreStep::Calls(vec![PlannedCall::new(
        "grep",
        json!({ "pattern": "hang" }),
    )]))]);

    let mut stream = start(&harness, &model);
    assert!(matches!(next(&mut stream).await, ExploreEvent::Started { .. }));
    assert!(matches!(next(&mut stream).await, ExploreEvent::ToolCall { .. }));
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(stream);
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(harness.pending().await, 0);
    assert!(harness.executor.calls()[0].cancel.is_cancelled());
}

/// The stream is a `futures_util::Stream` that ends after its terminal
/// event.
#[tokio::test]
async fn stream_ends_after_terminal_event() {
    let harness = DaemonHarness::start();
    let model = ScriptedModel::new(vec![Ok(ExploreStep::Finish {
        summary: "nothing to do".into(),
    })]);

    let mut stream = start(&harness, &model);
    let mut seen = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(3), stream.next())
        .await
        .expect("event in time")
    {
        seen.push(event);
    }

    assert_eq!(seen.len(), 2);
    assert!(seen[1].is_terminal());
}
