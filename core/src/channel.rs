// Raw channel boundary: the origin-scoped post/listen primitive the bridge runs on
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Wildcard target origin: deliver regardless of the receiver's origin.
pub const ANY_ORIGIN: &str = "*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("target context is closed")]
    Closed,

    #[error("post failed: {0}")]
    PostFailed(String),
}

/// Something a payload can be posted to (a remote window or frame).
///
/// Implementations are best-effort: `Ok(())` means the payload was handed to
/// the transport, not that anybody received it. A post whose `target_origin`
/// does not match the receiver is silently not delivered.
pub trait PostTarget: Send + Sync {
    fn post(&self, payload: Value, target_origin: &str) -> Result<(), TransportError>;
}

/// One inbound delivery as reported by the host.
#[derive(Clone)]
pub struct RawMessage {
    /// Origin of the sending context
    pub origin: String,
    pub data: Value,
    /// Handle for replying to exactly the sender
    pub source: Arc<dyn PostTarget>,
}

impl std::fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMessage")
            .field("origin", &self.origin)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

pub type ListenerId = u64;

/// The local context's side of the raw channel.
///
/// Every bridge attaches exactly one listener on construction and detaches
/// that same listener on teardown; several bridges may share one channel.
pub trait RawChannel: Send + Sync {
    /// Origin of this context; the default target origin of a bridge.
    fn origin(&self) -> &str;

    fn listen(&self) -> (ListenerId, mpsc::UnboundedReceiver<RawMessage>);

    fn unlisten(&self, id: ListenerId);
}
