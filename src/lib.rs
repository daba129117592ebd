#![forbid(unsafe_code)]

//! Request/response bridge that carries an agent's tool calls to a local
//! daemon over one multiplexed NDJSON channel and correlates the replies.

pub mod bridge;
pub mod config;
pub mod correlator;
pub mod daemon;
pub mod dispatch;
pub mod errors;
pub mod explore;
pub mod gateway;
pub mod models;
pub mod tools;
pub mod transport;
pub mod wire;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
