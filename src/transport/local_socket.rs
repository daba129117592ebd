//! Local-socket connector for the agent side.
//!
//! Connects to the daemon's named pipe (Windows) or Unix domain socket
//! (Linux/macOS) using the `interprocess` crate and wraps the stream in a
//! [`Channel`].

use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::GenericNamespaced;
use tracing::info;

use super::Channel;
use crate::config::BridgeConfig;
use crate::{AppError, Result};

/// Connect to the daemon listening on `config.ipc_name`.
///
/// # Errors
///
/// Returns [`AppError::Transport`] if the socket name is invalid or the
/// daemon is not reachable.
pub async fn connect(config: &BridgeConfig) -> Result<Channel> {
    let name = config.ipc_name.clone();
    let socket_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Transport(format!("invalid ipc socket name '{name}': {err}")))?;

    let stream = Stream::connect(socket_name)
        .await
        .map_err(|err| AppError::Transport(format!("cannot reach daemon at '{name}': {err}")))?;

    info!(ipc_name = %name, "connected to daemon");

    let (reader, writer) = stream.split();
    Ok(Channel::spawn(name, reader, writer, config))
}
