//! Explore producer task and its consumer-side stream.
//!
//! [`ExploreBridge::start`] spawns a producer that runs the nested agent
//! loop on a scoped, read-only [`Dispatcher`] and sends [`ExploreEvent`]s
//! over a bounded channel. The sequence always ends with exactly one
//! terminal event (`Finished` or `Error`) and then closes.
//!
//! Cancellation flows one way, outer to inner: the outer abort token, the
//! stream's overall deadline, [`ExploreStream::cancel`] and dropping the
//! stream all cancel the stream's dispatcher scope, which fails every nested
//! call in flight and signals the daemon for each.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::model::{ExploreModel, ExploreStep, PlannedCall, TranscriptEntry};
use crate::config::BridgeConfig;
use crate::dispatch::{CallOutcome, Dispatcher};
use crate::models::{ErrorPayload, ExecutionContext};
use crate::tools::schemas::ExploreInput;
use crate::AppError;

/// Error kind reported when the nested agent runs out of steps.
pub const STEP_LIMIT_KIND: &str = "step_limit_exceeded";

/// One incremental message from the explore sub-agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExploreEvent {
    /// The nested agent accepted the task.
    Started {
        /// Task text.
        task: String,
    },
    /// Intermediate reasoning.
    Message {
        /// Text.
        text: String,
    },
    /// A nested tool call is about to be dispatched.
    ToolCall {
        /// Tool name.
        tool: String,
        /// Raw arguments.
        args: Value,
    },
    /// A nested tool call finished.
    ToolResult {
        /// Call outcome.
        outcome: CallOutcome,
    },
    /// Terminal: the nested agent finished.
    Finished {
        /// Final answer.
        summary: String,
        /// Reasoning steps taken.
        steps: u32,
    },
    /// Terminal: the stream failed or was cancelled.
    Error {
        /// Structured failure.
        error: ErrorPayload,
    },
}

impl ExploreEvent {
    /// Whether no further events follow this one.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error { .. })
    }

    fn error(err: &AppError) -> Self {
        Self::Error {
            error: ErrorPayload::from(err),
        }
    }
}

/// Consumer side of one explore run. Finite and not restartable.
///
/// Dropping the stream cancels the producer.
#[derive(Debug)]
pub struct ExploreStream {
    rx: mpsc::Receiver<ExploreEvent>,
    cancel: CancellationToken,
}

impl ExploreStream {
    /// Next event, or `None` once the terminal event has been consumed.
    pub async fn next_event(&mut self) -> Option<ExploreEvent> {
        self.rx.recv().await
    }

    /// Cancel the nested agent and every tool call it has in flight.
    ///
    /// The stream still delivers its terminal `Error` event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream into a vector, ending with the terminal event.
    pub async fn collect_events(mut self) -> Vec<ExploreEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }
}

impl Stream for ExploreStream {
    type Item = ExploreEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ExploreStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts explore runs on a read-only scope of a parent dispatcher.
#[derive(Debug, Clone)]
pub struct ExploreBridge {
    dispatcher: Dispatcher,
    max_steps: u32,
    event_buffer: usize,
    budget: Duration,
}

impl ExploreBridge {
    /// Derive the bridge from `parent`, restricted to the explore tool
    /// subset of the parent's registry.
    #[must_use]
    pub fn new(parent: &Dispatcher, config: &BridgeConfig) -> Self {
        Self {
            dispatcher: parent.scoped(parent.registry().explore_subset()),
            max_steps: config.explore.max_steps,
            event_buffer: config.explore.event_buffer,
            budget: Duration::from_secs(config.timeouts.explore_seconds),
        }
    }

    /// Tools the nested agent may call.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Spawn the nested agent loop for `input` and return its event stream.
    ///
    /// `abort` is the outer call's cancellation signal.
    #[must_use]
    pub fn start(
        &self,
        input: ExploreInput,
        context: ExecutionContext,
        model: Arc<dyn ExploreModel>,
        abort: CancellationToken,
    ) -> ExploreStream {
        let dispatcher = self.dispatcher.scoped(self.dispatcher.registry().clone());
        let scope = dispatcher.cancel_token().clone();
        let deadline = Instant::now() + self.budget;
        let (tx, rx) = mpsc::channel(self.event_buffer);

        tokio::spawn(link_cancellation(abort, scope.clone(), deadline));

        let run = ExploreRun {
            dispatcher,
            model,
            context,
            tx,
            max_steps: self.max_steps,
            deadline,
        };
        tokio::spawn(run.drive(input).instrument(info_span!("explore")));

        ExploreStream { rx, cancel: scope }
    }
}

/// Cancel `scope` when the outer call aborts or the budget runs out; stop
/// watching once the scope ends on its own.
async fn link_cancellation(abort: CancellationToken, scope: CancellationToken, deadline: Instant) {
    tokio::select! {
        () = abort.cancelled() => {
            debug!("explore: outer call aborted");
            scope.cancel();
        }
        () = tokio::time::sleep_until(deadline) => {
            debug!("explore: budget exhausted");
            scope.cancel();
        }
        () = scope.cancelled() => {}
    }
}

struct ExploreRun {
    dispatcher: Dispatcher,
    model: Arc<dyn ExploreModel>,
    context: ExecutionContext,
    tx: mpsc::Sender<ExploreEvent>,
    max_steps: u32,
    deadline: Instant,
}

impl ExploreRun {
    async fn drive(self, input: ExploreInput) {
        let terminal = self.run_loop(input).await;
        if let Some(event) = terminal {
            if let ExploreEvent::Error { error } = &event {
                warn!(kind = %error.kind, message = %error.message, "explore: ended with error");
            }
            if self.tx.send(event).await.is_err() {
                debug!("explore: consumer dropped the stream before the terminal event");
            }
        }
        // Nested calls must not outlive the stream.
        self.dispatcher.cancel_token().cancel();
    }

    /// Run the loop; returns the terminal event, or `None` if the consumer
    /// went away.
    async fn run_loop(&self, input: ExploreInput) -> Option<ExploreEvent> {
        let scope = self.dispatcher.cancel_token();

        self.emit(ExploreEvent::Started {
            task: input.task.clone(),
        })
        .await?;
        info!(max_steps = self.max_steps, "explore: started");

        let mut transcript = vec![TranscriptEntry::Task {
            task: input.task,
            path: input.path,
        }];

        for step in 1..=self.max_steps {
            let next = tokio::select! {
                biased;
                () = scope.cancelled() => return Some(self.cancelled_event()),
                next = self.model.next_step(&transcript) => next,
            };

            match next {
                Err(err) => return Some(ExploreEvent::error(&err)),
                Ok(ExploreStep::Message(text)) => {
                    self.emit(ExploreEvent::Message { text: text.clone() }).await?;
                    transcript.push(TranscriptEntry::Message { text });
                }
                Ok(ExploreStep::Calls(calls)) => {
                    for outcome in self.run_calls(calls).await? {
                        transcript.push(TranscriptEntry::ToolResult { outcome });
                    }
                    if scope.is_cancelled() {
                        return Some(self.cancelled_event());
                    }
                }
                Ok(ExploreStep::Finish { summary }) => {
                    info!(steps = step, "explore: finished");
                    return Some(ExploreEvent::Finished {
                        summary,
                        steps: step,
                    });
                }
            }
        }

        Some(ExploreEvent::Error {
            error: ErrorPayload::new(
                STEP_LIMIT_KIND,
                format!("no answer after {} steps", self.max_steps),
            ),
        })
    }

    /// Announce, dispatch concurrently, and report each planned call.
    async fn run_calls(&self, calls: Vec<PlannedCall>) -> Option<Vec<CallOutcome>> {
        for call in &calls {
            self.emit(ExploreEvent::ToolCall {
                tool: call.tool.clone(),
                args: call.args.clone(),
            })
            .await?;
        }

        let results = join_all(
            calls
                .iter()
                .map(|call| self.dispatcher.dispatch(&call.tool, call.args.clone(), &self.context)),
        )
        .await;

        let mut outcomes = Vec::with_capacity(calls.len());
        for (call, result) in calls.into_iter().zip(results) {
            let outcome = match result {
                Ok(data) => CallOutcome::Success {
                    tool: call.tool,
                    data,
                },
                Err(err) => CallOutcome::Failure {
                    tool: call.tool,
                    error: ErrorPayload::from(&err),
                },
            };
            self.emit(ExploreEvent::ToolResult {
                outcome: outcome.clone(),
            })
            .await?;
            outcomes.push(outcome);
        }
        Some(outcomes)
    }

    fn cancelled_event(&self) -> ExploreEvent {
        if Instant::now() >= self.deadline {
            ExploreEvent::error(&AppError::Timeout("explore budget exhausted".into()))
        } else {
            ExploreEvent::error(&AppError::Cancelled("explore cancelled".into()))
        }
    }

    /// Send a non-terminal event; `None` when the consumer is gone.
    async fn emit(&self, event: ExploreEvent) -> Option<()> {
        if self.tx.send(event).await.is_err() {
            debug!("explore: consumer dropped the stream, stopping");
            return None;
        }
        Some(())
    }
}
