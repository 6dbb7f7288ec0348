// Validator & router: inbound raw messages -> request / response / event / heartbeat paths
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::bridge::Shared;
use crate::channel::RawMessage;
use crate::envelope::{status, Envelope, MessageType, ValidationError};
use crate::registry::HandlerError;
use crate::BridgeError;

/// Listener loop of one bridge. Messages are handled strictly in the order
/// the channel delivers them; the loop ends when the listener is detached.
pub(crate) async fn run(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<RawMessage>) {
    while let Some(raw) = rx.recv().await {
        if shared.is_destroyed() {
            break;
        }
        shared.route(raw);
    }
}

impl Shared {
    pub(crate) fn route(&self, raw: RawMessage) {
        if self.config.verify_origin && raw.origin != self.target_origin {
            diag!(self.config, origin = %raw.origin, "Message from unauthorized origin");
            return;
        }

        let Some(envelope) = self.config.message_format.decode(&raw.data) else {
            diag!(self.config, origin = %raw.origin, "Undecodable message dropped");
            return;
        };

        match envelope.validate_for(&self.config.namespace) {
            Ok(()) => {}
            // Foreign namespaces share the channel; their traffic is not ours to log.
            Err(ValidationError::NamespaceMismatch { .. }) => return,
            Err(e) => {
                diag!(self.config, error = %e, "Invalid message format");
                return;
            }
        }

        diag!(
            self.config,
            origin = %raw.origin,
            kind = %envelope.kind,
            message_id = ?envelope.message_id,
            "Received message"
        );

        match envelope.kind {
            MessageType::Request => self.handle_request(&raw, envelope),
            MessageType::Response => self.handle_response(envelope),
            MessageType::Event => self.handle_event(envelope),
            MessageType::Heartbeat => self.handle_heartbeat(&raw, envelope),
            MessageType::HeartbeatResponse => self.handle_heartbeat_response(&raw, envelope),
            MessageType::Unknown => {
                diag!(self.config, "Unknown message type");
            }
        }
    }

    /// Answers every request exactly once, whatever the handler does.
    fn handle_request(&self, raw: &RawMessage, envelope: Envelope) {
        let event_name = envelope.event_name.clone().unwrap_or_default();
        let message_id = envelope.message_id.clone().unwrap_or_default();

        let result = match self.requests.take_for_call(&event_name) {
            Some(handler) => match invoke(|| handler(envelope.params_or_null())) {
                Ok(Some(Value::Null)) | Ok(None) => status::unhandled(),
                Ok(Some(value)) => value,
                Err(e) => {
                    let message = e.to_string();
                    self.report(BridgeError::Handler {
                        event_name: event_name.clone(),
                        message: message.clone(),
                    });
                    status::error(message)
                }
            },
            None => {
                diag!(self.config, event_name = %event_name, "No handler found for request");
                status::no_handler(&event_name)
            }
        };

        let response = Envelope::response(self.config.namespace.clone(), message_id, result);
        self.reply(raw, &response);
    }

    fn handle_response(&self, envelope: Envelope) {
        let message_id = envelope.message_id.clone().unwrap_or_default();
        if !self.pending.resolve(&message_id, envelope.params_or_null()) {
            diag!(self.config, message_id = %message_id, "No handler found for response");
        }
    }

    fn handle_event(&self, envelope: Envelope) {
        let event_name = envelope.event_name.clone().unwrap_or_default();
        let handlers = self.events.snapshot(&event_name);
        if handlers.is_empty() {
            diag!(self.config, event_name = %event_name, "No handlers registered for event");
            return;
        }

        let params = envelope.params_or_null();
        for handler in handlers {
            if let Err(e) = invoke(|| handler(&params)) {
                self.report(BridgeError::Handler {
                    event_name: event_name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn handle_heartbeat(&self, raw: &RawMessage, envelope: Envelope) {
        let Some(counter) = envelope.counter else {
            return;
        };
        diag!(self.config, counter = %counter, origin = %raw.origin, "Received heartbeat");
        let pong = Envelope::heartbeat_response(self.config.namespace.clone(), counter);
        self.reply(raw, &pong);
    }

    fn handle_heartbeat_response(&self, raw: &RawMessage, envelope: Envelope) {
        let Some(counter) = envelope.counter else {
            return;
        };
        diag!(self.config, counter = %counter, origin = %raw.origin, "Received heartbeat response");
        // Only whole counters can be ours; other echoes are just logged.
        if let Some(counter) = counter.as_u64() {
            self.heartbeat.acknowledge(counter);
        }
    }

    /// Sends `envelope` back to exactly the sender of `raw`, at the sender's
    /// origin rather than the configured target origin.
    fn reply(&self, raw: &RawMessage, envelope: &Envelope) {
        let payload = match self.config.message_format.encode(envelope) {
            Ok(p) => p,
            Err(e) => {
                self.report(e.into());
                return;
            }
        };
        if let Err(e) = raw.source.post(payload, &raw.origin) {
            self.report(e.into());
        }
    }
}

/// Runs a handler, turning a panic into an ordinary handler error.
fn invoke<T>(f: impl FnOnce() -> Result<T, HandlerError>) -> Result<T, HandlerError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(message.into())
        }
    }
}
