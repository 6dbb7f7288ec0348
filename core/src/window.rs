// In-memory browsing contexts implementing the raw channel
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::channel::{
    ListenerId, PostTarget, RawChannel, RawMessage, TransportError, ANY_ORIGIN,
};

/// Delivery statistics of a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    /// Posts addressed to this window
    pub received: u64,
    /// Deliveries to listeners (one post reaching two listeners counts twice)
    pub delivered: u64,
    /// Posts not delivered because the target origin did not match
    pub filtered: u64,
    /// Posts rejected because the window was closed
    pub rejected: u64,
}

/// An in-process browsing context.
///
/// A `Window` has an origin and a set of message listeners. Other contexts
/// post into it through a handle obtained with [`Window::proxy_to`]; each
/// delivery reports the sender's origin and a handle for replying to it.
///
/// # Examples
///
/// ```
/// use crosswin_core::channel::{PostTarget, RawChannel};
/// use crosswin_core::Window;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let page = Window::new("https://app.example");
/// let frame = Window::new("https://widget.example");
///
/// let (_id, mut rx) = frame.listen();
/// let to_frame = page.proxy_to(&frame);
/// to_frame.post(json!({"hello": 1}), "https://widget.example").unwrap();
///
/// let msg = rx.recv().await.unwrap();
/// assert_eq!(msg.origin, "https://app.example");
/// assert_eq!(msg.data, json!({"hello": 1}));
/// # }
/// ```
pub struct Window {
    origin: String,
    listeners: DashMap<ListenerId, mpsc::UnboundedSender<RawMessage>>,
    next_listener: AtomicU64,
    closed: AtomicBool,

    received: AtomicU64,
    delivered: AtomicU64,
    filtered: AtomicU64,
    rejected: AtomicU64,
}

impl Window {
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            origin: origin.into(),
            listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            received: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Handle through which `self` posts into `target`.
    pub fn proxy_to(self: &Arc<Self>, target: &Arc<Window>) -> Arc<dyn PostTarget> {
        Arc::new(WindowProxy {
            target: Arc::clone(target),
            source: Arc::clone(self),
        })
    }

    /// Closes the window: listeners are dropped and every later post fails.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.listeners.clear();
            info!(target: "window", origin = %self.origin, "Window closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn stats(&self) -> WindowStats {
        WindowStats {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn deliver(
        self: &Arc<Self>,
        payload: Value,
        target_origin: &str,
        source: &Arc<Window>,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Closed);
        }
        self.received.fetch_add(1, Ordering::Relaxed);

        if target_origin != ANY_ORIGIN && target_origin != self.origin {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            debug!(
                target: "window",
                origin = %self.origin,
                target_origin = %target_origin,
                "Target origin mismatch, message not delivered"
            );
            return Ok(());
        }

        let reply_to: Arc<dyn PostTarget> = Arc::new(WindowProxy {
            target: Arc::clone(source),
            source: Arc::clone(self),
        });

        let mut dead = Vec::new();
        for entry in self.listeners.iter() {
            let msg = RawMessage {
                origin: source.origin.clone(),
                data: payload.clone(),
                source: Arc::clone(&reply_to),
            };
            if entry.value().send(msg).is_ok() {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.listeners.remove(&id);
        }
        Ok(())
    }
}

impl RawChannel for Window {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn listen(&self) -> (ListenerId, mpsc::UnboundedReceiver<RawMessage>) {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.listeners.insert(id, tx);
        }
        debug!(target: "window", origin = %self.origin, listener = id, "Listener attached");
        (id, rx)
    }

    fn unlisten(&self, id: ListenerId) {
        if self.listeners.remove(&id).is_some() {
            debug!(target: "window", origin = %self.origin, listener = id, "Listener detached");
        }
    }
}

/// `source` posting into `target`
struct WindowProxy {
    target: Arc<Window>,
    source: Arc<Window>,
}

impl PostTarget for WindowProxy {
    fn post(&self, payload: Value, target_origin: &str) -> Result<(), TransportError> {
        self.target.deliver(payload, target_origin, &self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mismatched_target_origin_is_filtered() {
        let a = Window::new("https://a.test");
        let b = Window::new("https://b.test");
        let (_id, mut rx) = b.listen();

        a.proxy_to(&b).post(json!(1), "https://elsewhere.test").unwrap();
        a.proxy_to(&b).post(json!(2), ANY_ORIGIN).unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.data, json!(2));
        assert_eq!(b.stats().filtered, 1);
        assert_eq!(b.stats().delivered, 1);
    }

    #[tokio::test]
    async fn reply_handle_reaches_the_sender() {
        let a = Window::new("https://a.test");
        let b = Window::new("https://b.test");
        let (_ia, mut rx_a) = a.listen();
        let (_ib, mut rx_b) = b.listen();

        a.proxy_to(&b).post(json!("ping"), "https://b.test").unwrap();
        let inbound = rx_b.recv().await.unwrap();
        inbound.source.post(json!("pong"), &inbound.origin).unwrap();

        let reply = rx_a.recv().await.unwrap();
        assert_eq!(reply.data, json!("pong"));
        assert_eq!(reply.origin, "https://b.test");
    }

    #[test]
    fn closed_window_rejects_posts() {
        let a = Window::new("https://a.test");
        let b = Window::new("https://b.test");
        let (_id, _rx) = b.listen();
        b.close();

        let err = a.proxy_to(&b).post(json!(1), ANY_ORIGIN).unwrap_err();
        assert_eq!(err, TransportError::Closed);
        assert_eq!(b.listener_count(), 0);
        assert_eq!(b.stats().rejected, 1);
    }

    #[test]
    fn unlisten_detaches_only_that_listener() {
        let w = Window::new("https://w.test");
        let (first, _rx1) = w.listen();
        let (_second, _rx2) = w.listen();
        assert_eq!(w.listener_count(), 2);
        w.unlisten(first);
        assert_eq!(w.listener_count(), 1);
    }
}
