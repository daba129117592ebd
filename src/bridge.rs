//! Agent-facing entry point: admission, then routing to the dispatcher or
//! the explore sub-agent.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, info_span, Instrument};

use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::explore::{ExploreBridge, ExploreStream, ModelProvider};
use crate::gateway::Gateway;
use crate::models::ExecutionContext;
use crate::tools::schemas::ExploreInput;
use crate::tools::{ToolDescriptor, ToolRoute};
use crate::{AppError, Result};

/// What a tool call produced.
#[derive(Debug)]
pub enum ToolOutput {
    /// A single payload (every tool except `explore`).
    Value(Value),
    /// Live progress of an `explore` call.
    Stream(ExploreStream),
}

impl ToolOutput {
    /// The payload, if this is a single-value output.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    /// The stream, if this is an `explore` output.
    #[must_use]
    pub fn into_stream(self) -> Option<ExploreStream> {
        match self {
            Self::Value(_) => None,
            Self::Stream(stream) => Some(stream),
        }
    }
}

/// Runs agent tool calls on behalf of authenticated callers.
#[derive(Clone)]
pub struct ToolBridge {
    dispatcher: Dispatcher,
    explore: ExploreBridge,
    gateway: Gateway,
    models: Arc<dyn ModelProvider>,
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge")
            .field("dispatcher", &self.dispatcher)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl ToolBridge {
    /// Wire the bridge around a root dispatcher.
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        gateway: Gateway,
        models: Arc<dyn ModelProvider>,
        config: &BridgeConfig,
    ) -> Self {
        let explore = ExploreBridge::new(&dispatcher, config);
        Self {
            dispatcher,
            explore,
            gateway,
            models,
        }
    }

    /// Descriptors of every tool the agent may call.
    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.dispatcher.registry().descriptors()
    }

    /// The root dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Admit the caller and run `tool`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Unauthorized`] / [`AppError::RateLimited`] from
    ///   admission; nothing is dispatched.
    /// - [`AppError::MissingGatewayKey`] for `explore` without a stored key.
    /// - Any error of [`Dispatcher::dispatch`].
    pub async fn invoke(
        &self,
        credential: &str,
        tool: &str,
        raw_args: Value,
        context: &ExecutionContext,
    ) -> Result<ToolOutput> {
        let user_id = self.gateway.admit(credential)?;
        let span = info_span!("invoke", user_id = %user_id, tool);

        async move {
            let descriptor = self
                .dispatcher
                .registry()
                .get(tool)
                .ok_or_else(|| AppError::UnknownTool(tool.to_owned()))?;

            if descriptor.route != ToolRoute::Explore {
                return self
                    .dispatcher
                    .dispatch(tool, raw_args, context)
                    .await
                    .map(ToolOutput::Value);
            }

            let validated = descriptor.validate(raw_args)?;
            let input: ExploreInput = serde_json::from_value(Value::Object(validated.input))
                .map_err(|e| AppError::InvalidArguments(format!("{tool}: {e}")))?;

            let key = self.gateway.gateway_key(&user_id).await?;
            let model = self.models.open(&key, context)?;
            info!("explore stream starting");

            Ok(ToolOutput::Stream(self.explore.start(
                input,
                context.clone(),
                model,
                self.dispatcher.cancel_token().child_token(),
            )))
        }
        .instrument(span)
        .await
    }

    /// Cancel every call and stream started through this bridge.
    pub fn shutdown(&self) {
        self.dispatcher.cancel_token().cancel();
    }
}
