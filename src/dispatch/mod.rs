//! Agent-side call dispatch.
//!
//! - `dispatcher`: validates a single tool call, sends it, and awaits the
//!   correlated outcome under its deadline and cancellation scope.
//! - `batch`: fans one `batch` call out into concurrent dispatches and
//!   reports ordered per-entry outcomes.

pub mod batch;
pub mod dispatcher;

pub use batch::CallOutcome;
pub use dispatcher::Dispatcher;
