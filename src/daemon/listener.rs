//! Local-socket listener for the daemon.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate and serves each accepted agent connection
//! with [`serve_connection`].

use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::{serve_connection, ToolExecutor};
use crate::{AppError, Result};

/// Spawn the daemon's accept loop on `ipc_name`.
///
/// Cancelling `shutdown` stops accepting and ends every open connection.
///
/// # Errors
///
/// Returns [`AppError::Transport`] if the name is invalid or the listener
/// cannot be created.
pub fn spawn_daemon(
    ipc_name: &str,
    executor: Arc<dyn ToolExecutor>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let name = ipc_name.to_owned();
    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Transport(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Transport(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "daemon listening");

    let span = info_span!("daemon", ipc_name = %name);
    let handle = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("daemon shutting down");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok(stream) => {
                            let (reader, writer) = stream.split();
                            tokio::spawn(
                                serve_connection(reader, writer, Arc::clone(&executor), shutdown.clone())
                                    .instrument(info_span!("daemon_conn")),
                            );
                        }
                        Err(err) => warn!(%err, "daemon accept failed"),
                    },
                }
            }
        }
        .instrument(span),
    );

    Ok(handle)
}
