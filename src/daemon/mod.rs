//! Daemon side of the bridge: receives call envelopes, runs them through a
//! [`ToolExecutor`] and writes one terminal envelope per call.
//!
//! The executors that actually touch the file system or spawn shells live
//! outside this crate.

pub mod connection;
pub mod listener;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::models::{ErrorPayload, ExecutionContext};

pub use connection::serve_connection;
pub use listener::spawn_daemon;

/// Structured failure reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    /// Short machine-readable category, e.g. `not_found`.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

impl ToolFailure {
    /// Build a failure.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl Display for ToolFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<ToolFailure> for ErrorPayload {
    fn from(failure: ToolFailure) -> Self {
        Self::new(failure.kind, failure.message)
    }
}

/// Boxed future returned by [`ToolExecutor::execute`].
pub type ExecuteFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Value, ToolFailure>> + Send + 'a>>;

/// Runs one tool call on the daemon's machine.
pub trait ToolExecutor: Send + Sync {
    /// Execute `method` with validated `input` under `context`.
    ///
    /// `cancel` fires when the agent sends a cancel envelope or the
    /// connection ends; long-running work should stop when it does.
    fn execute<'a>(
        &'a self,
        method: &'a str,
        input: Map<String, Value>,
        context: ExecutionContext,
        cancel: CancellationToken,
    ) -> ExecuteFuture<'a>;
}
