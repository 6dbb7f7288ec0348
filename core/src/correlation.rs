// Correlation table: one record per in-flight request, keyed by message id
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::envelope::Envelope;
use crate::{BridgeError, Result};

/// Bookkeeping for one in-flight request.
///
/// The resolver, the timeout timer and the audit fields live in a single
/// record so they are always created and destroyed together.
pub(crate) struct PendingRequest {
    event_name: String,
    /// The request envelope as it was broadcast
    message: Envelope,
    /// Wall-clock send time, milliseconds since epoch
    sent_at_ms: i64,
    retries: u32,
    reply: oneshot::Sender<Result<Value>>,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    fn settle(mut self, outcome: Result<Value>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // The caller may have dropped its handle; nothing to do then.
        let _ = self.reply.send(outcome);
    }
}

/// Read-only view of a pending record
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInfo {
    pub event_name: String,
    pub message: Envelope,
    pub sent_at_ms: i64,
    pub retries: u32,
}

pub(crate) struct CorrelationTable {
    pending: DashMap<String, PendingRequest>,
    /// Runtime the timeout timers are spawned on
    runtime: Handle,
}

impl CorrelationTable {
    pub fn new(runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            runtime,
        })
    }

    /// Registers `message` and arms its timeout. Must be called before the
    /// request is broadcast so that a fast response finds its record.
    pub fn open(
        self: &Arc<Self>,
        message_id: String,
        message: Envelope,
        timeout: Duration,
    ) -> PendingReply {
        let event_name = message.event_name.clone().unwrap_or_default();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            message_id.clone(),
            PendingRequest {
                event_name,
                message,
                sent_at_ms: chrono::Utc::now().timestamp_millis(),
                retries: 0,
                reply: tx,
                timer: None,
            },
        );

        let table: Weak<Self> = Arc::downgrade(self);
        let id = message_id.clone();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(table) = table.upgrade() {
                table.expire(&id, timeout);
            }
        });

        match self.pending.get_mut(&message_id) {
            Some(mut record) => record.timer = Some(timer.abort_handle()),
            None => timer.abort(),
        }

        PendingReply {
            message_id: Some(message_id),
            state: ReplyState::Waiting(rx),
        }
    }

    /// Completes the request with the response's params. Returns `false`
    /// when no record exists (timed out, already answered, or unknown).
    pub fn resolve(&self, message_id: &str, params: Value) -> bool {
        match self.pending.remove(message_id) {
            Some((_, record)) => {
                record.settle(Ok(params));
                true
            }
            None => false,
        }
    }

    /// Fails the request immediately.
    pub fn fail(&self, message_id: &str, err: BridgeError) -> bool {
        match self.pending.remove(message_id) {
            Some((_, record)) => {
                record.settle(Err(err));
                true
            }
            None => false,
        }
    }

    fn expire(&self, message_id: &str, timeout: Duration) {
        if let Some((_, record)) = self.pending.remove(message_id) {
            debug!(
                target: "crosswin::correlation",
                message_id = %message_id,
                event_name = %record.event_name,
                "Request timed out"
            );
            let err = BridgeError::Timeout {
                event_name: record.event_name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            };
            record.settle(Err(err));
        }
    }

    /// Removes every record, cancelling timers and failing each waiter with
    /// the error produced by `err`. Returns how many were drained.
    pub fn drain(&self, err: impl Fn() -> BridgeError) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for id in ids {
            if let Some((_, record)) = self.pending.remove(&id) {
                record.settle(Err(err()));
                drained += 1;
            }
        }
        drained
    }

    pub fn info(&self, message_id: &str) -> Option<PendingInfo> {
        self.pending.get(message_id).map(|r| PendingInfo {
            event_name: r.event_name.clone(),
            message: r.message.clone(),
            sent_at_ms: r.sent_at_ms,
            retries: r.retries,
        })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

enum ReplyState {
    Waiting(oneshot::Receiver<Result<Value>>),
    Failed(Option<BridgeError>),
}

/// Handle for the outcome of a request.
///
/// Resolves with the responder's `params`, or fails with
/// [`BridgeError::Timeout`], [`BridgeError::Undeliverable`] or
/// [`BridgeError::Destroyed`]. The request is already on the wire when the
/// handle is returned; dropping the handle does not cancel it.
#[must_use = "a PendingReply does nothing unless awaited"]
pub struct PendingReply {
    message_id: Option<String>,
    state: ReplyState,
}

impl PendingReply {
    pub(crate) fn failed(err: BridgeError) -> Self {
        Self {
            message_id: None,
            state: ReplyState::Failed(Some(err)),
        }
    }

    /// Correlation id of the request, if it was sent.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            ReplyState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or(Err(BridgeError::Destroyed))),
            ReplyState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(BridgeError::Destroyed)))
            }
        }
    }
}
