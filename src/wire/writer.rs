//! Channel writer task.
//!
//! The single owner of a stream's write half. Receives outbound envelopes
//! from a bounded [`mpsc`] channel and writes each as one NDJSON line, so
//! frames from concurrent callers never interleave.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::Envelope;
use crate::wire::codec::BridgeCodec;
use crate::{AppError, Result};

/// Writer task: serialise envelopes from `frame_rx` onto `stream`.
///
/// Exits cleanly when `cancel` fires or every sender is dropped.
///
/// # Errors
///
/// Returns [`AppError::Transport`]`("write failed: …")` when the underlying
/// stream rejects a write; the caller is expected to tear the channel down.
pub async fn run_writer<W>(
    label: String,
    mut stream: W,
    mut frame_rx: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut codec = BridgeCodec::new();
    let mut buf = BytesMut::new();

    loop {
        let envelope = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(channel = %label, "writer: cancellation received, stopping");
                break;
            }

            frame = frame_rx.recv() => {
                let Some(envelope) = frame else {
                    debug!(channel = %label, "writer: frame queue closed, stopping");
                    break;
                };
                envelope
            }
        };

        let line = match envelope.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(channel = %label, error = %e, "writer: dropping unserialisable envelope");
                continue;
            }
        };

        buf.clear();
        codec.encode(line, &mut buf)?;

        // A peer that stops reading must not hold the writer past close.
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(channel = %label, "writer: cancelled mid-write, abandoning stream");
                return Ok(());
            }

            written = write_frame(&mut stream, &buf) => {
                if let Err(e) = written {
                    warn!(channel = %label, error = %e, "writer: write failed");
                    return Err(AppError::Transport(format!("write failed: {e}")));
                }
            }
        }
    }

    if let Err(e) = stream.shutdown().await {
        debug!(channel = %label, error = %e, "writer: shutdown failed");
    }
    Ok(())
}

async fn write_frame<W>(stream: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await
}
