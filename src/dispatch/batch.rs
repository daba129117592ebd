//! Batch coordinator: one `batch` call fanned out into concurrent dispatches.
//!
//! Structural problems (too many entries, an empty batch, an entry naming a
//! non-remote tool such as `batch` or `explore`) fail the whole batch before
//! anything is sent. Past that point every entry stands alone: an unknown
//! tool, invalid arguments, a daemon failure or a timeout becomes that
//! entry's [`CallOutcome::Failure`] and the other entries are unaffected.
//! Entries share the caller's execution context and run with no ordering
//! between them; outcomes are reported in input order.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, info_span, Instrument};

use super::Dispatcher;
use crate::models::{ErrorPayload, ExecutionContext};
use crate::tools::schemas::BatchEntry;
use crate::tools::ToolRoute;
use crate::{AppError, Result};

/// Outcome of one batch entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    /// The call returned a payload.
    Success {
        /// Tool that was called.
        tool: String,
        /// Result payload.
        data: Value,
    },
    /// The call failed.
    Failure {
        /// Tool that was called.
        tool: String,
        /// Structured failure.
        error: ErrorPayload,
    },
}

impl CallOutcome {
    fn from_result(tool: String, result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self::Success { tool, data },
            Err(err) => Self::Failure {
                tool,
                error: ErrorPayload::from(&err),
            },
        }
    }

    /// Whether the entry succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Tool the entry called.
    #[must_use]
    pub fn tool(&self) -> &str {
        match self {
            Self::Success { tool, .. } | Self::Failure { tool, .. } => tool,
        }
    }

    /// Failure payload, if the entry failed.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

impl Dispatcher {
    /// Dispatch every entry concurrently and collect ordered outcomes.
    ///
    /// # Errors
    ///
    /// - [`AppError::BatchTooLarge`] above the configured maximum.
    /// - [`AppError::InvalidBatch`] for an empty batch or an entry naming a
    ///   tool that cannot run inside a batch.
    ///
    /// Per-entry failures never surface here.
    pub async fn dispatch_batch(
        &self,
        calls: Vec<BatchEntry>,
        context: &ExecutionContext,
    ) -> Result<Vec<CallOutcome>> {
        let max = self.max_batch_size();
        if calls.len() > max {
            return Err(AppError::BatchTooLarge {
                len: calls.len(),
                max,
            });
        }
        if calls.is_empty() {
            return Err(AppError::InvalidBatch(
                "batch must contain at least one call".into(),
            ));
        }
        for (index, entry) in calls.iter().enumerate() {
            if let Some(descriptor) = self.registry().get(&entry.tool) {
                if descriptor.route != ToolRoute::Remote {
                    return Err(AppError::InvalidBatch(format!(
                        "entry {index}: `{}` cannot run inside a batch",
                        entry.tool
                    )));
                }
            }
        }

        let span = info_span!("batch", entries = calls.len());
        async move {
            let results = join_all(
                calls
                    .iter()
                    .map(|entry| self.dispatch_remote(&entry.tool, entry.args.clone(), context)),
            )
            .await;

            let outcomes: Vec<CallOutcome> = calls
                .into_iter()
                .zip(results)
                .map(|(entry, result)| CallOutcome::from_result(entry.tool, result))
                .collect();

            let failures = outcomes.iter().filter(|o| !o.is_success()).count();
            info!(entries = outcomes.len(), failures, "batch completed");
            Ok(outcomes)
        }
        .instrument(span)
        .await
    }
}
