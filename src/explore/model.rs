//! Reasoning collaborator for the explore sub-agent.
//!
//! The model itself lives outside this crate; the loop only needs to ask it
//! what to do next given everything that has happened so far.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::CallOutcome;
use crate::models::ExecutionContext;
use crate::Result;

/// A tool call the model wants made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCall {
    /// Tool name.
    pub tool: String,
    /// Raw arguments.
    pub args: Value,
}

impl PlannedCall {
    /// Build a planned call.
    #[must_use]
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// What the model decided to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ExploreStep {
    /// Narrate intermediate reasoning.
    Message(String),
    /// Run these tool calls (concurrently) and report back.
    Calls(Vec<PlannedCall>),
    /// Enough has been gathered; end with this summary.
    Finish {
        /// Final answer for the outer agent.
        summary: String,
    },
}

/// One entry of the history the model reasons over.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// The delegated task.
    Task {
        /// Task text.
        task: String,
        /// Directory to focus on.
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// A narration the model produced.
    Message {
        /// Text.
        text: String,
    },
    /// Outcome of a tool call the model requested.
    ToolResult {
        /// Call outcome.
        outcome: CallOutcome,
    },
}

/// The nested agent's reasoning step.
pub trait ExploreModel: Send + Sync {
    /// Decide the next step given the transcript so far.
    ///
    /// # Errors
    ///
    /// Any error ends the stream with a terminal error event.
    fn next_step<'a>(
        &'a self,
        transcript: &'a [TranscriptEntry],
    ) -> Pin<Box<dyn Future<Output = Result<ExploreStep>> + Send + 'a>>;
}

/// Opens a model for one explore stream using the caller's gateway key.
pub trait ModelProvider: Send + Sync {
    /// Open a model bound to `gateway_key` for a call made under `context`.
    ///
    /// # Errors
    ///
    /// Implementation-defined; surfaced to the caller before the stream
    /// starts.
    fn open(&self, gateway_key: &str, context: &ExecutionContext) -> Result<Arc<dyn ExploreModel>>;
}
