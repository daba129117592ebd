//! Wire-level data model: envelopes and the per-call execution context.

pub mod context;
pub mod envelope;

pub use context::ExecutionContext;
pub use envelope::{
    CallEnvelope, CancelEnvelope, Envelope, ErrorPayload, RequestId, ResultEnvelope,
};
