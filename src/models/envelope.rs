//! Envelope types exchanged between the agent-side bridge and the daemon.
//!
//! Every frame on the wire is one JSON object with a `tag` discriminator:
//!
//! | `tag`    | Shape                                            | Direction      |
//! |----------|--------------------------------------------------|----------------|
//! | `call`   | `{ requestId, method, input, context }`          | agent → daemon |
//! | `result` | `{ requestId, data }`                            | daemon → agent |
//! | `cancel` | `{ requestId }`                                  | agent → daemon |
//!
//! Failures share the `result` tag: a `data` object whose keys are exactly
//! `kind` and `message` (both strings) is an error, anything else is a
//! success payload. See [`ResultEnvelope::into_outcome`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::context::ExecutionContext;
use crate::{AppError, Result};

/// Opaque correlation key for one outstanding call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A tool invocation sent to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    /// Correlation key.
    pub request_id: RequestId,
    /// Tool name.
    pub method: String,
    /// Validated arguments.
    pub input: Map<String, Value>,
    /// Identity/project metadata for the executor.
    pub context: ExecutionContext,
}

/// A terminal reply for one request id: success payload or error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    /// Correlation key of the call this terminates.
    pub request_id: RequestId,
    /// Success payload, or an [`ErrorPayload`] object.
    pub data: Value,
}

impl ResultEnvelope {
    /// Split into the request id and a success/failure outcome by sniffing
    /// the shape of `data`.
    #[must_use]
    pub fn into_outcome(self) -> (RequestId, std::result::Result<Value, ErrorPayload>) {
        match ErrorPayload::from_data(&self.data) {
            Some(error) => (self.request_id, Err(error)),
            None => (self.request_id, Ok(self.data)),
        }
    }
}

/// Best-effort request to stop work on an outstanding call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelEnvelope {
    /// Correlation key of the call to stop.
    pub request_id: RequestId,
}

/// Structured failure carried in the `data` field of an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Short machine-readable category.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Build a payload from a kind and message.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Recognise an error-shaped `data` value.
    ///
    /// Matches only an object with exactly the keys `kind` and `message`,
    /// both strings, so a success payload that happens to contain a `kind`
    /// field is not misread as a failure.
    #[must_use]
    pub fn from_data(data: &Value) -> Option<Self> {
        let obj = data.as_object()?;
        if obj.len() != 2 {
            return None;
        }
        let kind = obj.get("kind")?.as_str()?;
        let message = obj.get("message")?.as_str()?;
        Some(Self::new(kind, message))
    }

    /// Convert into the error surfaced to the original caller.
    #[must_use]
    pub fn into_error(self) -> AppError {
        AppError::Remote {
            kind: self.kind,
            message: self.message,
        }
    }
}

impl From<&AppError> for ErrorPayload {
    fn from(err: &AppError) -> Self {
        Self::new(err.kind(), err.message())
    }
}

/// Any frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
pub enum Envelope {
    /// Tool invocation.
    Call(CallEnvelope),
    /// Terminal success or failure.
    Result(ResultEnvelope),
    /// Best-effort cancellation signal.
    Cancel(CancelEnvelope),
}

impl Envelope {
    /// Build a call envelope.
    #[must_use]
    pub fn call(
        request_id: RequestId,
        method: impl Into<String>,
        input: Map<String, Value>,
        context: ExecutionContext,
    ) -> Self {
        Self::Call(CallEnvelope {
            request_id,
            method: method.into(),
            input,
            context,
        })
    }

    /// Build a success envelope.
    #[must_use]
    pub fn success(request_id: RequestId, data: Value) -> Self {
        Self::Result(ResultEnvelope { request_id, data })
    }

    /// Build an error envelope (shares the `result` tag).
    #[must_use]
    pub fn failure(request_id: RequestId, error: &ErrorPayload) -> Self {
        let data = serde_json::json!({
            "kind": error.kind,
            "message": error.message,
        });
        Self::Result(ResultEnvelope { request_id, data })
    }

    /// Build a cancellation envelope.
    #[must_use]
    pub fn cancel(request_id: RequestId) -> Self {
        Self::Cancel(CancelEnvelope { request_id })
    }

    /// Correlation key of this frame.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Call(call) => &call.request_id,
            Self::Result(result) => &result.request_id,
            Self::Cancel(cancel) => &cancel.request_id,
        }
    }

    /// Serialise to one compact JSON line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Codec`] if serialisation fails.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Codec(format!("failed to serialise envelope: {e}")))
    }

    /// Parse one JSON line into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Codec`]`("malformed envelope: …")` if the line is
    /// not valid JSON or does not match any envelope shape.
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| AppError::Codec(format!("malformed envelope: {e}")))
    }
}
