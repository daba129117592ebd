//! Agent-side transport channel.
//!
//! A [`Channel`] wraps one duplex byte stream to the daemon (one per user
//! session) and owns four tasks:
//!
//! 1. **writer**: sole owner of the write half; frames from concurrent
//!    callers are queued on a bounded mpsc and written one at a time.
//! 2. **reader**: decodes inbound frames.
//! 3. **demux**: routes each result envelope to the [`Correlator`] by
//!    request id. When the stream ends, breaks, or the channel is closed, it
//!    fails every pending call with [`AppError::Transport`].
//! 4. **sweep**: the correlator's expired-call sweep.
//!
//! The channel is framing and routing only; it never interprets payloads or
//! execution contexts.

pub mod local_socket;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::BridgeConfig;
use crate::correlator::Correlator;
use crate::models::{Envelope, RequestId};
use crate::wire::reader::run_reader;
use crate::wire::writer::run_writer;
use crate::wire::Inbound;
use crate::{AppError, Result};

/// Capacity of the reader → demux queue.
const INBOUND_QUEUE: usize = 64;

/// One duplex connection to a daemon plus its pending-call table.
#[derive(Debug)]
pub struct Channel {
    label: String,
    frames: mpsc::Sender<Envelope>,
    correlator: Correlator,
    cancel: CancellationToken,
}

impl Channel {
    /// Start the channel's tasks over an already-connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, W>(label: impl Into<String>, reader: R, writer: W, config: &BridgeConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let cancel = CancellationToken::new();
        let correlator = Correlator::new(config.limits.max_pending_calls);
        let (frame_tx, frame_rx) = mpsc::channel(config.limits.outbound_queue);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

        let span = info_span!("channel", channel = %label);

        // Writer: a failed write tears the whole channel down.
        {
            let label = label.clone();
            let cancel = cancel.clone();
            let correlator = correlator.clone();
            tokio::spawn(
                async move {
                    if let Err(err) = run_writer(label, writer, frame_rx, cancel.clone()).await {
                        correlator.fail_all(err).await;
                        cancel.cancel();
                    }
                }
                .instrument(span.clone()),
            );
        }

        tokio::spawn(
            run_reader(label.clone(), reader, inbound_tx, cancel.child_token())
                .instrument(span.clone()),
        );

        tokio::spawn(
            run_demux(label.clone(), inbound_rx, correlator.clone(), cancel.clone())
                .instrument(span.clone()),
        );

        // The sweep handle is detached; it stops with the channel token.
        drop(correlator.spawn_sweeper(config.sweep_interval(), cancel.child_token()));

        info!(channel = %label, "channel started");

        Self {
            label,
            frames: frame_tx,
            correlator,
            cancel,
        }
    }

    /// Channel label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The channel's pending-call table.
    #[must_use]
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Queue an envelope for the writer task.
    ///
    /// Waits for queue space, so a slow daemon pushes back on callers.
    /// Closing the channel releases every waiting sender.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the channel is closed.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        tokio::select! {
            biased;

            () = self.cancel.cancelled() => Err(AppError::Transport(format!(
                "channel '{}' is closed",
                self.label
            ))),

            sent = self.frames.send(envelope) => sent.map_err(|_| {
                AppError::Transport(format!("channel '{}' writer has stopped", self.label))
            }),
        }
    }

    /// Best-effort cancellation signal for `request_id`.
    ///
    /// Never blocks: if the outbound queue is full or closed the signal is
    /// dropped and logged.
    pub fn signal_cancel(&self, request_id: &RequestId) {
        match self.frames.try_send(Envelope::cancel(request_id.clone())) {
            Ok(()) => debug!(channel = %self.label, request_id = %request_id, "cancel signal queued"),
            Err(err) => warn!(
                channel = %self.label,
                request_id = %request_id,
                error = %err,
                "cancel signal dropped"
            ),
        }
    }

    /// Whether the channel has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close the channel and fail every pending call with
    /// [`AppError::Transport`].
    pub async fn close(&self) {
        self.cancel.cancel();
        self.correlator
            .fail_all(AppError::Transport("channel closed".into()))
            .await;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Route inbound frames to the correlator until the stream ends or the
/// channel is cancelled, then fail whatever is still pending.
async fn run_demux(
    label: String,
    mut inbound_rx: mpsc::Receiver<Inbound>,
    correlator: Correlator,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break "channel closed".to_owned(),

            item = inbound_rx.recv() => match item {
                None => break "reader stopped".to_owned(),
                Some(Inbound::Closed { reason }) => break reason,
                Some(Inbound::Frame(Envelope::Result(result))) => {
                    let (request_id, outcome) = result.into_outcome();
                    match outcome {
                        Ok(payload) => {
                            correlator.resolve(&request_id, payload).await;
                        }
                        Err(error) => {
                            correlator.reject(&request_id, error.into_error()).await;
                        }
                    }
                }
                Some(Inbound::Frame(other)) => {
                    warn!(
                        channel = %label,
                        request_id = %other.request_id(),
                        "demux: unexpected non-result frame from daemon, skipping"
                    );
                }
            },
        }
    };

    cancel.cancel();
    let failed = correlator
        .fail_all(AppError::Transport(reason.clone()))
        .await;
    info!(channel = %label, reason, failed, "channel stopped");
}
