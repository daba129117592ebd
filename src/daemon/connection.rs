//! One agent connection on the daemon side.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::ToolExecutor;
use crate::models::{CallEnvelope, Envelope, ErrorPayload, RequestId};
use crate::wire::reader::run_reader;
use crate::wire::writer::run_writer;
use crate::wire::Inbound;
use crate::AppError;

const FRAME_QUEUE: usize = 64;

type InFlight = Arc<Mutex<HashMap<RequestId, CancellationToken>>>;

/// Serve tool calls arriving on `reader`, answering on `writer`, until the
/// agent disconnects or `shutdown` fires.
///
/// Each call runs in its own task with its own cancellation token. A cancel
/// envelope fires that token and the call's reply is suppressed. A call
/// reusing the id of one still in flight is answered with a
/// `duplicate_request_id` error envelope and not executed.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    executor: Arc<dyn ToolExecutor>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let conn = shutdown.child_token();
    let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
    let (inbound_tx, mut inbound_rx) = mpsc::channel(FRAME_QUEUE);
    let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));

    let writer_task = tokio::spawn(run_writer("daemon".into(), writer, frame_rx, conn.clone()));
    tokio::spawn(run_reader("daemon".into(), reader, inbound_tx, conn.clone()));

    let reason = loop {
        tokio::select! {
            biased;

            () = conn.cancelled() => break "shutdown".to_owned(),

            item = inbound_rx.recv() => match item {
                None => break "reader stopped".to_owned(),
                Some(Inbound::Closed { reason }) => break reason,
                Some(Inbound::Frame(Envelope::Call(call))) => {
                    accept_call(call, &executor, &in_flight, &frame_tx, &conn).await;
                }
                Some(Inbound::Frame(Envelope::Cancel(cancel))) => {
                    if let Some(token) = in_flight.lock().await.remove(&cancel.request_id) {
                        debug!(request_id = %cancel.request_id, "daemon: call cancelled by agent");
                        token.cancel();
                    } else {
                        debug!(request_id = %cancel.request_id, "daemon: cancel for settled call ignored");
                    }
                }
                Some(Inbound::Frame(other)) => {
                    warn!(request_id = %other.request_id(), "daemon: unexpected result frame from agent, skipping");
                }
            },
        }
    };

    conn.cancel();
    let abandoned: Vec<CancellationToken> =
        in_flight.lock().await.drain().map(|(_, token)| token).collect();
    for token in &abandoned {
        token.cancel();
    }
    let abandoned = abandoned.len();
    drop(frame_tx);
    if let Ok(Err(err)) = writer_task.await {
        warn!(error = %err, "daemon: writer failed");
    }
    info!(reason, abandoned, "daemon connection closed");
}

async fn accept_call(
    call: CallEnvelope,
    executor: &Arc<dyn ToolExecutor>,
    in_flight: &InFlight,
    frame_tx: &mpsc::Sender<Envelope>,
    conn: &CancellationToken,
) {
    let request_id = call.request_id.clone();
    let token = {
        let mut calls = in_flight.lock().await;
        if calls.contains_key(&request_id) {
            drop(calls);
            warn!(request_id = %request_id, "daemon: duplicate in-flight request id");
            let error = ErrorPayload::from(&AppError::DuplicateRequestId(request_id.to_string()));
            if frame_tx.send(Envelope::failure(request_id, &error)).await.is_err() {
                debug!("daemon: connection gone before duplicate-id reply");
            }
            return;
        }
        let token = conn.child_token();
        calls.insert(request_id.clone(), token.clone());
        token
    };

    let executor = Arc::clone(executor);
    let in_flight = Arc::clone(in_flight);
    let frame_tx = frame_tx.clone();
    let span = info_span!("execute", request_id = %request_id, method = %call.method);

    tokio::spawn(
        async move {
            let outcome = tokio::select! {
                outcome = executor.execute(&call.method, call.input, call.context, token.clone()) => Some(outcome),
                () = token.cancelled() => None,
            };

            let still_ours = in_flight.lock().await.remove(&request_id).is_some();
            let reply = match outcome {
                Some(_) if !still_ours || token.is_cancelled() => None,
                Some(Ok(data)) => Some(Envelope::success(request_id, data)),
                Some(Err(failure)) => {
                    debug!(kind = %failure.kind, "daemon: executor reported failure");
                    Some(Envelope::failure(request_id, &ErrorPayload::from(failure)))
                }
                None => None,
            };

            match reply {
                Some(envelope) => {
                    if frame_tx.send(envelope).await.is_err() {
                        debug!("daemon: connection gone before reply");
                    }
                }
                None => debug!("daemon: reply suppressed for cancelled call"),
            }
        }
        .instrument(span),
    );
}
