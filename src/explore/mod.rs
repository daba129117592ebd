//! Explore sub-agent: a nested, read-only agent loop whose progress is
//! relayed as a live stream.
//!
//! - `model`: the reasoning collaborator ([`ExploreModel`]) the loop asks
//!   for its next step, and the [`ModelProvider`] that opens one per stream.
//! - `stream`: the producer task, its [`ExploreEvent`]s and the
//!   consumer-side [`ExploreStream`].

pub mod model;
pub mod stream;

pub use model::{ExploreModel, ExploreStep, ModelProvider, PlannedCall, TranscriptEntry};
pub use stream::{ExploreBridge, ExploreEvent, ExploreStream};
