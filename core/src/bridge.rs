use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channel::{ListenerId, PostTarget, RawChannel};
use crate::config::BridgeConfig;
use crate::correlation::{CorrelationTable, PendingInfo, PendingReply};
use crate::envelope::Envelope;
use crate::heartbeat::{self, HeartbeatState, Liveness};
use crate::registry::{EventHandlers, HandlerError, HandlerId, RequestHandlers, TargetSet};
use crate::{router, BridgeError, Result};

/// Sink for errors caught inside the bridge (failing handlers, reply
/// transport failures). The default logs them.
pub type ErrorHandler = Arc<dyn Fn(&BridgeError) + Send + Sync>;

fn default_error_handler() -> ErrorHandler {
    Arc::new(|err: &BridgeError| {
        error!(target: "crosswin", error = %err, "Bridge error");
    })
}

/// State shared between the public handle, the listener task and the
/// heartbeat task. Private to one bridge instance.
pub(crate) struct Shared {
    pub(crate) config: BridgeConfig,
    /// Resolved target origin (configured, or the local channel's origin)
    pub(crate) target_origin: String,
    pub(crate) events: EventHandlers,
    pub(crate) requests: RequestHandlers,
    pub(crate) targets: TargetSet,
    pub(crate) pending: Arc<CorrelationTable>,
    pub(crate) heartbeat: HeartbeatState,
    pub(crate) error_handler: ErrorHandler,
    pub(crate) destroyed: AtomicBool,
    pub(crate) runtime: tokio::runtime::Handle,
}

impl Shared {
    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn report(&self, err: BridgeError) {
        (self.error_handler)(&err);
    }

    /// Posts `envelope` to every registered target. Failures are logged per
    /// target and do not stop delivery to the others. Returns how many posts
    /// succeeded.
    pub(crate) fn broadcast(&self, envelope: &Envelope) -> Result<usize> {
        let payload = self.config.message_format.encode(envelope)?;
        let mut delivered = 0;
        for target in self.targets.snapshot() {
            match target.post(payload.clone(), &self.target_origin) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        target: "crosswin",
                        namespace = %self.config.namespace,
                        kind = %envelope.kind,
                        error = %e,
                        "Failed to send message to target window"
                    );
                }
            }
        }
        Ok(delivered)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(BridgeError::Destroyed);
        }
        Ok(())
    }
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One endpoint of a cross-context channel.
///
/// A bridge listens on a [`RawChannel`] (its own context) and broadcasts to
/// a set of [`PostTarget`]s (the peers). It offers fire-and-forget events,
/// correlated requests with a timeout, and a heartbeat. Bridges configured
/// with different namespaces can share one channel without seeing each
/// other's traffic.
///
/// A request is broadcast to every target; the first response carrying its
/// message id wins and later ones are dropped.
///
/// # Examples
///
/// ```
/// use crosswin_core::{Bridge, BridgeConfig, Window};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> crosswin_core::Result<()> {
/// let page = Window::new("https://app.example");
/// let frame = Window::new("https://widget.example");
///
/// let host = Bridge::new(
///     page.clone(),
///     BridgeConfig::default().with_target_origin("https://widget.example"),
/// )?;
/// let widget = Bridge::new(
///     frame.clone(),
///     BridgeConfig::default().with_target_origin("https://app.example"),
/// )?;
/// host.add_target(page.proxy_to(&frame));
///
/// widget.on_request("ping", |params| {
///     let n = params["n"].as_i64().unwrap_or(0);
///     Ok(Some(json!({ "n": n + 1 })))
/// });
///
/// let reply = host.request("ping", json!({"n": 1})).await?;
/// assert_eq!(reply, json!({"n": 2}));
/// # Ok(())
/// # }
/// ```
pub struct Bridge {
    shared: Arc<Shared>,
    channel: Arc<dyn RawChannel>,
    listener_id: ListenerId,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// Creates a bridge listening on `channel`. Must be called inside a
    /// tokio runtime.
    pub fn new(channel: Arc<dyn RawChannel>, config: BridgeConfig) -> Result<Self> {
        Self::with_error_handler(channel, config, default_error_handler())
    }

    pub fn with_error_handler(
        channel: Arc<dyn RawChannel>,
        config: BridgeConfig,
        error_handler: ErrorHandler,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::Config(format!("a tokio runtime is required: {e}")))?;

        let target_origin = config
            .target_origin
            .clone()
            .unwrap_or_else(|| channel.origin().to_string());

        let shared = Arc::new(Shared {
            config,
            target_origin,
            events: EventHandlers::default(),
            requests: RequestHandlers::default(),
            targets: TargetSet::default(),
            pending: CorrelationTable::new(runtime.clone()),
            heartbeat: HeartbeatState::default(),
            error_handler,
            destroyed: AtomicBool::new(false),
            runtime: runtime.clone(),
        });

        let (listener_id, rx) = channel.listen();
        let listener = runtime.spawn(router::run(Arc::clone(&shared), rx));

        info!(
            target: "crosswin",
            namespace = %shared.config.namespace,
            target_origin = %shared.target_origin,
            "Bridge created"
        );

        Ok(Self {
            shared,
            channel,
            listener_id,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.shared.config.namespace
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Origin outbound posts are addressed to.
    pub fn target_origin(&self) -> &str {
        &self.shared.target_origin
    }

    /// Adds a window to broadcast to. Returns `false` if it was already present.
    pub fn add_target(&self, target: Arc<dyn PostTarget>) -> bool {
        let added = self.shared.targets.add(target);
        if added {
            diag!(self.shared.config, "Added target window");
        }
        added
    }

    pub fn remove_target(&self, target: &Arc<dyn PostTarget>) -> bool {
        let removed = self.shared.targets.remove(target);
        if removed {
            diag!(self.shared.config, "Removed target window");
        }
        removed
    }

    pub fn target_count(&self) -> usize {
        self.shared.targets.len()
    }

    /// Registers an event handler. Handlers for one name run in registration
    /// order; each failure is reported and does not stop the others.
    pub fn on_event<F>(&self, event_name: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.shared.events.add(event_name, Arc::new(handler));
        diag!(self.shared.config, event_name = %event_name, "Registered handler for event");
        id
    }

    /// Removes one handler (`Some(id)`) or all handlers (`None`) for an event.
    pub fn off_event(&self, event_name: &str, id: Option<HandlerId>) -> usize {
        let removed = self.shared.events.remove(event_name, id);
        if removed > 0 {
            diag!(self.shared.config, event_name = %event_name, removed, "Removed event handlers");
        }
        removed
    }

    /// Registers the request handler for a name, replacing any previous one.
    ///
    /// `Ok(None)` (or JSON `null`) is answered with `{status: "unhandled"}`;
    /// `Err` is reported to the error handler and answered with
    /// `{status: "error", message}`.
    pub fn on_request<F>(&self, event_name: &str, handler: F) -> HandlerId
    where
        F: Fn(Value) -> std::result::Result<Option<Value>, HandlerError> + Send + Sync + 'static,
    {
        let id = self.shared.requests.set(event_name, Arc::new(handler));
        diag!(self.shared.config, event_name = %event_name, "Registered handler for request");
        id
    }

    /// Like [`Bridge::on_request`], but the handler is unregistered after
    /// its first invocation.
    pub fn once_request<F>(&self, event_name: &str, handler: F) -> HandlerId
    where
        F: Fn(Value) -> std::result::Result<Option<Value>, HandlerError> + Send + Sync + 'static,
    {
        let id = self.shared.requests.set_once(event_name, Arc::new(handler));
        diag!(self.shared.config, event_name = %event_name, "Registered one-shot handler for request");
        id
    }

    pub fn off_request(&self, event_name: &str) -> bool {
        let removed = self.shared.requests.remove(event_name);
        if removed {
            diag!(self.shared.config, event_name = %event_name, "Removed handler for request");
        }
        removed
    }

    /// Broadcasts an event and returns its message id. No reply is awaited.
    pub fn emit_event(&self, event_name: &str, params: Value) -> Result<String> {
        self.shared.ensure_alive()?;

        let message_id = new_message_id();
        let envelope = Envelope::event(
            self.shared.config.namespace.clone(),
            message_id.clone(),
            event_name,
            params,
        );
        let delivered = self.shared.broadcast(&envelope)?;
        diag!(self.shared.config, event_name = %event_name, message_id = %message_id, delivered, "Emitted event");
        Ok(message_id)
    }

    /// Broadcasts a request and returns a handle for its response.
    ///
    /// The handle fails immediately if the name is empty, the bridge is
    /// destroyed, or no target accepted the post; otherwise it settles with
    /// the first matching response or fails after the configured timeout.
    pub fn request(&self, event_name: &str, params: Value) -> PendingReply {
        if let Err(e) = self.shared.ensure_alive() {
            return PendingReply::failed(e);
        }

        let message_id = new_message_id();
        let envelope = Envelope::request(
            self.shared.config.namespace.clone(),
            message_id.clone(),
            event_name,
            params,
        );

        let reply = self.shared.pending.open(
            message_id.clone(),
            envelope.clone(),
            self.shared.config.message_timeout(),
        );

        match self.shared.broadcast(&envelope) {
            Ok(0) => {
                diag!(self.shared.config, event_name = %event_name, message_id = %message_id, "Request reached no target");
                self.shared.pending.fail(
                    &message_id,
                    BridgeError::Undeliverable {
                        event_name: event_name.to_string(),
                    },
                );
            }
            Ok(delivered) => {
                diag!(self.shared.config, event_name = %event_name, message_id = %message_id, delivered, "Sent request");
            }
            Err(e) => {
                self.shared.pending.fail(&message_id, e);
            }
        }
        reply
    }

    /// Starts broadcasting heartbeats every `interval`. Returns `Ok(false)`
    /// if a heartbeat is already running.
    pub fn start_heartbeat(&self, interval: Duration) -> Result<bool> {
        self.shared.ensure_alive()?;
        heartbeat::start(&self.shared, interval)
    }

    /// Stops the heartbeat. Returns `false` if none was running.
    pub fn stop_heartbeat(&self) -> bool {
        heartbeat::stop(&self.shared)
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.shared.heartbeat.is_running()
    }

    pub fn liveness(&self) -> Liveness {
        self.shared.heartbeat.snapshot()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Audit view of one in-flight request, by the id its handle reports.
    pub fn pending_info(&self, message_id: &str) -> Option<PendingInfo> {
        self.shared.pending.info(message_id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    /// Tears the bridge down: detaches the listener, stops the heartbeat,
    /// fails every pending request with [`BridgeError::Destroyed`] and
    /// empties all tables. Idempotent; also runs on drop.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.channel.unlisten(self.listener_id);
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }

        heartbeat::stop(&self.shared);
        let drained = self.shared.pending.drain(|| BridgeError::Destroyed);

        self.shared.targets.clear();
        self.shared.events.clear();
        self.shared.requests.clear();

        info!(
            target: "crosswin",
            namespace = %self.shared.config.namespace,
            drained,
            "Bridge destroyed"
        );
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.destroy();
    }
}
