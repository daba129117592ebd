//! The agent-side entry point for tool calls.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::BridgeConfig;
use crate::models::{Envelope, ExecutionContext, RequestId};
use crate::tools::schemas::BatchInput;
use crate::tools::{ToolDescriptor, ToolRegistry, ToolRoute, ValidatedInput};
use crate::transport::Channel;
use crate::{AppError, Result};

/// Validates, sends and awaits tool calls over one [`Channel`].
///
/// Each dispatcher carries a cancellation scope. Cancelling it fails every
/// call the dispatcher has in flight with [`AppError::Cancelled`] and sends a
/// best-effort cancel envelope for each. [`scoped`](Self::scoped) derives a
/// dispatcher with a narrower registry and a child scope, which is how the
/// explore sub-agent is confined.
///
/// No retries are attempted; a failed call is reported to the caller.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    channel: Arc<Channel>,
    registry: Arc<ToolRegistry>,
    cancel: CancellationToken,
    max_batch_size: usize,
    max_timeout: Duration,
    grace: Duration,
}

impl Dispatcher {
    /// Create a root dispatcher.
    #[must_use]
    pub fn new(channel: Arc<Channel>, registry: Arc<ToolRegistry>, config: &BridgeConfig) -> Self {
        Self {
            channel,
            registry,
            cancel: CancellationToken::new(),
            max_batch_size: config.limits.max_batch_size,
            max_timeout: config.max_timeout(),
            grace: config.grace_period(),
        }
    }

    /// Derive a dispatcher on the same channel restricted to `registry`,
    /// whose scope is cancelled whenever this one is.
    #[must_use]
    pub fn scoped(&self, registry: ToolRegistry) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            registry: Arc::new(registry),
            cancel: self.cancel.child_token(),
            max_batch_size: self.max_batch_size,
            max_timeout: self.max_timeout,
            grace: self.grace,
        }
    }

    /// Tools this dispatcher accepts.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Cancellation scope of this dispatcher.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Configured maximum batch size.
    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Invoke `tool` with `raw_args` on behalf of `context`.
    ///
    /// `batch` calls are fanned out and answered with the ordered outcome
    /// list as a JSON array.
    ///
    /// # Errors
    ///
    /// - [`AppError::UnknownTool`] if `tool` is not in this registry.
    /// - [`AppError::InvalidArguments`] if validation fails (nothing is sent),
    ///   or if `tool` is `explore`, which only runs as a stream.
    /// - [`AppError::Remote`] if the daemon reports a failure.
    /// - [`AppError::Timeout`], [`AppError::Cancelled`],
    ///   [`AppError::Transport`], [`AppError::Overloaded`] as the call ends.
    /// - Batch structural errors from [`dispatch_batch`](Self::dispatch_batch).
    pub async fn dispatch(
        &self,
        tool: &str,
        raw_args: Value,
        context: &ExecutionContext,
    ) -> Result<Value> {
        let descriptor = self
            .registry
            .get(tool)
            .ok_or_else(|| AppError::UnknownTool(tool.to_owned()))?;
        let validated = descriptor.validate(raw_args)?;

        match descriptor.route {
            ToolRoute::Remote => self.call_remote(descriptor, validated, context).await,
            ToolRoute::Batch => {
                let batch: BatchInput = serde_json::from_value(Value::Object(validated.input))
                    .map_err(|e| AppError::InvalidArguments(format!("{tool}: {e}")))?;
                let outcomes = self.dispatch_batch(batch.calls, context).await?;
                serde_json::to_value(outcomes)
                    .map_err(|e| AppError::Codec(format!("failed to encode batch outcomes: {e}")))
            }
            ToolRoute::Explore => Err(AppError::InvalidArguments(format!(
                "{tool}: streams its output and cannot be dispatched as a single call"
            ))),
        }
    }

    /// Look up, validate and send one remote call. Used for batch entries,
    /// whose routes were checked up front.
    pub(crate) async fn dispatch_remote(
        &self,
        tool: &str,
        raw_args: Value,
        context: &ExecutionContext,
    ) -> Result<Value> {
        let descriptor = self
            .registry
            .get(tool)
            .ok_or_else(|| AppError::UnknownTool(tool.to_owned()))?;
        if descriptor.route != ToolRoute::Remote {
            return Err(AppError::InvalidArguments(format!(
                "{tool}: not a remote tool"
            )));
        }
        let validated = descriptor.validate(raw_args)?;
        self.call_remote(descriptor, validated, context).await
    }

    /// Effective deadline: an explicit request plus grace, else the tool's
    /// default, never above the configured maximum.
    fn effective_timeout(&self, descriptor: &ToolDescriptor, requested: Option<Duration>) -> Duration {
        requested
            .map_or(descriptor.default_timeout, |t| t + self.grace)
            .min(self.max_timeout)
    }

    async fn call_remote(
        &self,
        descriptor: &ToolDescriptor,
        validated: ValidatedInput,
        context: &ExecutionContext,
    ) -> Result<Value> {
        let request_id = RequestId::generate();
        let span = info_span!("dispatch", tool = %descriptor.name, request_id = %request_id);

        async move {
            let timeout = self.effective_timeout(descriptor, validated.requested_timeout);
            let deadline = Instant::now() + timeout;
            let correlator = self.channel.correlator();

            let mut handle = correlator
                .register(request_id.clone(), &descriptor.name, deadline)
                .await?;

            let envelope = Envelope::call(
                request_id.clone(),
                descriptor.name.clone(),
                validated.input,
                context.clone(),
            );
            // Queue space is bounded by the same deadline and scope as the
            // reply; nothing has reached the daemon yet, so no cancel signal.
            let sent = tokio::select! {
                sent = self.channel.send(envelope) => sent,

                () = tokio::time::sleep_until(deadline) => Err(AppError::Timeout(format!(
                    "{}: outbound queue still full after {}ms",
                    descriptor.name,
                    timeout.as_millis()
                ))),

                () = self.cancel.cancelled() => {
                    Err(AppError::Cancelled("dispatcher scope cancelled".into()))
                }
            };
            if let Err(err) = sent {
                warn!(error = %err, "dispatch: send failed");
                correlator.reject(&request_id, err).await;
                return handle.await;
            }
            debug!(timeout_ms = timeout.as_millis(), "dispatch: call sent");

            let mut guard = CancelOnDrop::new(&self.channel, &request_id);

            let outcome = tokio::select! {
                outcome = &mut handle => outcome,

                () = tokio::time::sleep_until(deadline) => {
                    correlator.expire(&request_id).await;
                    handle.await
                }

                () = self.cancel.cancelled() => {
                    correlator.cancel(&request_id, "dispatcher scope cancelled").await;
                    handle.await
                }
            };

            guard.disarm();

            // Timeout and Cancelled only originate locally, possibly from
            // the sweeper. The daemon should stop work on the call.
            match &outcome {
                Err(AppError::Timeout(_)) => {
                    warn!(timeout_ms = timeout.as_millis(), "dispatch: deadline elapsed");
                    self.channel.signal_cancel(&request_id);
                }
                Err(AppError::Cancelled(_)) => {
                    debug!("dispatch: cancelled by scope");
                    self.channel.signal_cancel(&request_id);
                }
                _ => {}
            }
            outcome
        }
        .instrument(span)
        .await
    }
}

/// Signals the daemon when a sent call's future is dropped before its
/// outcome was observed, e.g. by an outer `timeout` or `select!`.
struct CancelOnDrop<'a> {
    channel: &'a Arc<Channel>,
    request_id: &'a RequestId,
    armed: bool,
}

impl<'a> CancelOnDrop<'a> {
    fn new(channel: &'a Arc<Channel>, request_id: &'a RequestId) -> Self {
        Self {
            channel,
            request_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(request_id = %self.request_id, "dispatch: call abandoned by caller");
        self.channel.signal_cancel(self.request_id);

        // The table lock is async; without a runtime the sweeper drops the
        // abandoned entry instead.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let correlator = self.channel.correlator().clone();
            let request_id = self.request_id.clone();
            runtime.spawn(async move {
                correlator.cancel(&request_id, "caller dropped the call").await;
            });
        }
    }
}
