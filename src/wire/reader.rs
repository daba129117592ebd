//! Channel reader task.
//!
//! Reads newline-delimited JSON frames from one half of a duplex stream,
//! parses each line into an [`Envelope`], and forwards it through a tokio
//! [`mpsc`] channel. The reader knows nothing about correlation; the
//! consumer demultiplexes by request id.
//!
//! Malformed lines and oversized frames are logged and skipped. End of
//! stream and I/O errors are reported once as [`Inbound::Closed`] so the
//! consumer can fail whatever is still outstanding.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::Envelope;
use crate::wire::codec::BridgeCodec;
use crate::AppError;

/// Item delivered by [`run_reader`].
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A well-formed envelope.
    Frame(Envelope),
    /// The stream ended or failed; no more frames follow.
    Closed {
        /// Human-readable reason (`stream closed`, `stream error: …`).
        reason: String,
    },
}

/// Parse one inbound line.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns [`AppError::Codec`]`("malformed envelope: …")` if the line is
/// not a recognised envelope.
pub fn parse_inbound_line(line: &str) -> crate::Result<Option<Envelope>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    Envelope::from_line(line).map(Some)
}

/// Reader task: decode frames from `stream` and forward them to `frame_tx`.
///
/// Exits when the stream ends (after sending [`Inbound::Closed`]), on a
/// non-recoverable I/O error (likewise), when `frame_tx` is dropped, or when
/// `cancel` fires (without sending `Closed`).
pub async fn run_reader<R>(
    label: String,
    stream: R,
    frame_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stream, BridgeCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(channel = %label, "reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(channel = %label, "reader: EOF detected");
                        send_closed(&frame_tx, &label, "stream closed".to_owned()).await;
                        break;
                    }

                    Some(Err(AppError::Codec(ref msg))) => {
                        warn!(channel = %label, error = msg.as_str(), "reader: framing error, skipping");
                    }

                    Some(Err(e)) => {
                        warn!(channel = %label, error = %e, "reader: IO error, stopping");
                        send_closed(&frame_tx, &label, format!("stream error: {e}")).await;
                        break;
                    }

                    Some(Ok(line)) => match parse_inbound_line(&line) {
                        Ok(Some(envelope)) => {
                            if frame_tx.send(Inbound::Frame(envelope)).await.is_err() {
                                debug!(channel = %label, "reader: consumer gone, stopping");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(channel = %label, error = %e, "reader: parse error, skipping line");
                        }
                    },
                }
            }
        }
    }
}

async fn send_closed(frame_tx: &mpsc::Sender<Inbound>, label: &str, reason: String) {
    if frame_tx.send(Inbound::Closed { reason }).await.is_err() {
        debug!(channel = label, "reader: consumer gone before close could be delivered");
    }
}
