//! Request correlation: who is waiting for which request id.
//!
//! The [`Correlator`] owns the table of [`PendingCall`]s for one channel.
//! Callers [`register`](Correlator::register) a request id before sending
//! and await the returned [`PendingHandle`]; the channel's reader resolves
//! or rejects entries as terminal envelopes arrive, in any order.
//!
//! Every mutation (resolve, reject, cancel, expire, sweep, fail-all) takes
//! the same table lock and *removes* the entry before answering it, so the
//! first one to reach an entry decides its outcome and every later attempt
//! is a logged no-op.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::RequestId;
use crate::{AppError, Result};

type Responder = oneshot::Sender<Result<Value>>;

/// Bookkeeping for one outstanding call.
#[derive(Debug)]
struct PendingCall {
    method: String,
    created_at: DateTime<Utc>,
    deadline: Instant,
    responder: Responder,
}

#[derive(Debug, Default)]
struct Table {
    pending: HashMap<RequestId, PendingCall>,
    /// Set once the channel has failed; later registrations are refused.
    closed: Option<String>,
}

/// Awaitable handle for one registered call.
///
/// Resolves to the payload of the matching result envelope, or to the error
/// the call ended with (`Remote`, `Timeout`, `Cancelled`, `Transport`).
#[derive(Debug)]
pub struct PendingHandle {
    request_id: RequestId,
    deadline: Instant,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingHandle {
    /// Request id this handle waits on.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Deadline registered for the call.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for PendingHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(AppError::Transport(
                    "pending call dropped without a terminal outcome".into(),
                ))
            })
        })
    }
}

/// Pending-call table for one channel.
///
/// Cheap to clone; clones share the same table.
#[derive(Debug, Clone)]
pub struct Correlator {
    table: Arc<Mutex<Table>>,
    max_pending: usize,
}

impl Correlator {
    /// Create an empty correlator that admits at most `max_pending`
    /// outstanding calls.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            max_pending,
        }
    }

    /// Register a pending call and return the handle to await.
    ///
    /// # Errors
    ///
    /// - [`AppError::DuplicateRequestId`] if `request_id` is already pending.
    /// - [`AppError::Overloaded`] if the pending-call limit is reached.
    /// - [`AppError::Transport`] if the channel has already failed.
    pub async fn register(
        &self,
        request_id: RequestId,
        method: &str,
        deadline: Instant,
    ) -> Result<PendingHandle> {
        let mut table = self.table.lock().await;

        if let Some(reason) = &table.closed {
            return Err(AppError::Transport(format!("channel closed: {reason}")));
        }
        if table.pending.contains_key(&request_id) {
            return Err(AppError::DuplicateRequestId(request_id.to_string()));
        }
        if table.pending.len() >= self.max_pending {
            warn!(
                pending = table.pending.len(),
                max = self.max_pending,
                "correlator: pending-call limit reached, refusing call"
            );
            return Err(AppError::Overloaded(format!(
                "{} calls already outstanding on this channel",
                table.pending.len()
            )));
        }

        let (tx, rx) = oneshot::channel();
        table.pending.insert(
            request_id.clone(),
            PendingCall {
                method: method.to_owned(),
                created_at: Utc::now(),
                deadline,
                responder: tx,
            },
        );
        debug!(request_id = %request_id, method, "correlator: call registered");

        Ok(PendingHandle {
            request_id,
            deadline,
            rx,
        })
    }

    /// Fulfil a pending call with its success payload.
    ///
    /// Returns `false` (and logs) if no call is pending under `request_id`.
    pub async fn resolve(&self, request_id: &RequestId, payload: Value) -> bool {
        self.complete(request_id, Ok(payload)).await
    }

    /// Fail a pending call.
    ///
    /// Returns `false` (and logs) if no call is pending under `request_id`.
    pub async fn reject(&self, request_id: &RequestId, error: AppError) -> bool {
        self.complete(request_id, Err(error)).await
    }

    /// Remove a pending call and fail it with [`AppError::Cancelled`].
    ///
    /// Local bookkeeping only; signalling the daemon is the dispatcher's job.
    pub async fn cancel(&self, request_id: &RequestId, reason: &str) -> bool {
        self.complete(request_id, Err(AppError::Cancelled(reason.to_owned())))
            .await
    }

    /// Remove a pending call whose deadline elapsed and fail it with
    /// [`AppError::Timeout`].
    pub async fn expire(&self, request_id: &RequestId) -> bool {
        let Some(call) = self.table.lock().await.pending.remove(request_id) else {
            debug!(request_id = %request_id, "correlator: expire on settled call ignored");
            return false;
        };
        let error = timeout_error(&call);
        deliver(request_id, call, Err(error));
        true
    }

    /// Reject every call past its deadline and drop every entry whose waiter
    /// has gone away. Returns the number of entries removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let removed: Vec<(RequestId, PendingCall)> = {
            let mut table = self.table.lock().await;
            let ids: Vec<RequestId> = table
                .pending
                .iter()
                .filter(|(_, call)| call.deadline <= now || call.responder.is_closed())
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| table.pending.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = removed.len();
        for (id, call) in removed {
            if call.responder.is_closed() {
                debug!(request_id = %id, method = %call.method, "correlator: waiter gone, entry dropped");
            } else {
                let error = timeout_error(&call);
                deliver(&id, call, Err(error));
            }
        }
        count
    }

    /// Fail every pending call with `error` and refuse new registrations.
    ///
    /// Used when the channel breaks. Returns the number of calls failed.
    pub async fn fail_all(&self, error: AppError) -> usize {
        let drained: Vec<(RequestId, PendingCall)> = {
            let mut table = self.table.lock().await;
            if table.closed.is_none() {
                table.closed = Some(error.message());
            }
            table.pending.drain().collect()
        };

        let count = drained.len();
        if count > 0 {
            warn!(count, error = %error, "correlator: failing all pending calls");
        }
        for (id, call) in drained {
            deliver(&id, call, Err(error.clone()));
        }
        count
    }

    /// Number of calls currently outstanding.
    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.pending.len()
    }

    /// Whether `request_id` is currently outstanding.
    pub async fn is_pending(&self, request_id: &RequestId) -> bool {
        self.table.lock().await.pending.contains_key(request_id)
    }

    /// Spawn the background sweep that enforces deadlines for calls whose
    /// caller stopped waiting before its own timer fired.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let correlator = self.clone();
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("correlator sweep shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            let removed = correlator.sweep_expired().await;
                            if removed > 0 {
                                debug!(removed, "correlator sweep removed stale calls");
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("correlator_sweep")),
        )
    }

    async fn complete(&self, request_id: &RequestId, outcome: Result<Value>) -> bool {
        let Some(call) = self.table.lock().await.pending.remove(request_id) else {
            debug!(
                request_id = %request_id,
                "correlator: no pending call for terminal message, dropping"
            );
            return false;
        };
        deliver(request_id, call, outcome);
        true
    }
}

fn timeout_error(call: &PendingCall) -> AppError {
    let elapsed = Utc::now() - call.created_at;
    AppError::Timeout(format!(
        "no result for `{}` after {}ms",
        call.method,
        elapsed.num_milliseconds()
    ))
}

fn deliver(request_id: &RequestId, call: PendingCall, outcome: Result<Value>) {
    if call.responder.send(outcome).is_err() {
        debug!(
            request_id = %request_id,
            method = %call.method,
            "correlator: waiter dropped before outcome was delivered"
        );
    }
}
